//! Shared domain types and OpenAPI schemas.
//!
//! - [`Status`] - the operational state reported by the sensor
//! - [`DeviceIdentity`] - the (name, address) pair history is keyed on
//! - [`StatusSession`] - one contiguous interval of a single status
//! - [`DurationTable`] - accumulated milliseconds per status

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Operational state of the monitored machine.
///
/// `None` is the "not classified yet" sentinel and never appears in a
/// persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No classification yet.
    #[default]
    None,
    /// Spindle idle.
    Idle,
    /// Cutting within normal load.
    NormalCutting,
    /// Load above the warning threshold.
    Warning,
    /// Load above the danger threshold.
    Danger,
}

impl Status {
    /// The four real statuses in storage and display order.
    pub const TRACKED: [Self; 4] = [Self::Idle, Self::NormalCutting, Self::Warning, Self::Danger];

    /// Integer code used in the session store.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Idle => 1,
            Self::NormalCutting => 2,
            Self::Warning => 3,
            Self::Danger => 4,
        }
    }

    /// Inverse of [`Status::code`]. Unknown codes map to `None`.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Idle),
            2 => Some(Self::NormalCutting),
            3 => Some(Self::Warning),
            4 => Some(Self::Danger),
            _ => None,
        }
    }

    /// Human-readable label, also the token the sensor sends on the wire.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Idle => "Idle",
            Self::NormalCutting => "Normal Cutting",
            Self::Warning => "Warning",
            Self::Danger => "Danger",
        }
    }

    /// Returns `true` for every status except the `None` sentinel.
    #[inline]
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        !matches!(self, Self::None)
    }

    const fn slot(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Idle => Some(0),
            Self::NormalCutting => Some(1),
            Self::Warning => Some(2),
            Self::Danger => Some(3),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The (name, address) pair that identifies a monitored peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct DeviceIdentity {
    /// Advertised device name.
    #[schema(example = "IDP-Monitor")]
    pub name: String,

    /// Bluetooth MAC address.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: String,
}

impl DeviceIdentity {
    /// Creates a new identity.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// One contiguous interval during which the device reported a single status.
///
/// `duration_ms` is derived and kept in sync by [`StatusSession::set_end`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSession {
    device: DeviceIdentity,
    status: Status,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration_ms: u64,
}

impl StatusSession {
    /// Opens a zero-length session at `start`.
    #[must_use]
    pub fn open(device: DeviceIdentity, status: Status, start: DateTime<Utc>) -> Self {
        Self {
            device,
            status,
            start,
            end: start,
            duration_ms: 0,
        }
    }

    /// Rebuilds a closed session, e.g. from the store. An `end` earlier than
    /// `start` is clamped.
    #[must_use]
    pub fn closed(
        device: DeviceIdentity,
        status: Status,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::open(device, status, start);
        session.set_end(end);
        session
    }

    /// Moves the end of the interval and recomputes the duration.
    ///
    /// An `end` before `start` is clamped to `start`.
    pub fn set_end(&mut self, end: DateTime<Utc>) {
        self.end = end.max(self.start);
        let millis = (self.end - self.start).num_milliseconds();
        self.duration_ms = u64::try_from(millis).unwrap_or(0);
    }

    /// The device this session belongs to.
    #[must_use]
    pub const fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// The reported status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Start of the interval.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the interval.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `end - start` in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// Accumulated milliseconds per tracked status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationTable {
    millis: [u64; 4],
}

impl DurationTable {
    /// Milliseconds accumulated for `status`. Always 0 for [`Status::None`].
    #[must_use]
    pub const fn get(&self, status: Status) -> u64 {
        match status.slot() {
            Some(slot) => self.millis[slot],
            None => 0,
        }
    }

    /// Adds `millis` to the total of `status`. [`Status::None`] is ignored.
    pub fn add(&mut self, status: Status, millis: u64) {
        if let Some(slot) = status.slot() {
            self.millis[slot] = self.millis[slot].saturating_add(millis);
        }
    }

    /// Sum over all tracked statuses.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.millis.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Iterates `(status, millis)` in [`Status::TRACKED`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Status, u64)> + '_ {
        Status::TRACKED.into_iter().map(move |s| (s, self.get(s)))
    }
}

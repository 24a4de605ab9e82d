//! Threshold editing and the firmware threshold command.
//!
//! A [`ThresholdSet`] holds three ordered boundaries that split the sensor's
//! load range into the Idle, Normal Cutting, Warning and Danger bands.
//! Boundaries always keep [`MIN_GAP`] between each other and the implicit
//! zero boundary, and the top one never exceeds [`MAX_VALUE`]. Edits are
//! clamped into that shape rather than rejected.
//!
//! [`ThresholdEditor`] persists each boundary under keys `1..=3` and pushes
//! the set to the peripheral as `"FFFF-AAAA-BBBB-CCCC;"` (feature index and
//! the three boundaries, zero padded decimal).

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::connection::BluetoothResult;
use crate::storage::PersistenceGateway;

/// Smallest allowed distance between neighbouring boundaries.
pub const MIN_GAP: u16 = 50;

/// Largest value the top boundary may take.
pub const MAX_VALUE: u16 = 1800;

/// Boundaries used when nothing has been stored yet.
pub const DEFAULT_THRESHOLDS: [u16; 3] = [100, 750, 1500];

/// Number of editable boundaries.
pub const THRESHOLD_COUNT: usize = 3;

/// Errors raised by threshold edits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    /// The boundary index is not 0, 1 or 2.
    #[error("Threshold index {index} out of range (expected 0..{THRESHOLD_COUNT})")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
    },
}

/// Ordered triple of band boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet {
    values: [u16; THRESHOLD_COUNT],
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            values: DEFAULT_THRESHOLDS,
        }
    }
}

impl ThresholdSet {
    /// Builds a set from arbitrary values, pushing boundaries apart until
    /// every gap is at least [`MIN_GAP`] and the top one fits [`MAX_VALUE`].
    #[must_use]
    pub fn normalized(values: [u16; THRESHOLD_COUNT]) -> Self {
        let mut v = values;
        for (i, value) in v.iter_mut().enumerate() {
            *value = (*value).clamp(Self::lower_bound(i), Self::upper_bound(i));
        }
        for i in 1..THRESHOLD_COUNT {
            v[i] = v[i].max(v[i - 1].saturating_add(MIN_GAP));
        }
        for i in (0..THRESHOLD_COUNT - 1).rev() {
            v[i] = v[i].min(v[i + 1].saturating_sub(MIN_GAP));
        }
        Self { values: v }
    }

    /// The three boundaries, lowest first.
    #[must_use]
    pub const fn values(&self) -> [u16; THRESHOLD_COUNT] {
        self.values
    }

    /// Boundary `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::IndexOutOfRange`] for an index above 2.
    pub fn get(&self, index: usize) -> Result<u16, ThresholdError> {
        self.values
            .get(index)
            .copied()
            .ok_or(ThresholdError::IndexOutOfRange { index })
    }

    /// Moves boundary `index` by `delta`, clamped between its neighbours.
    ///
    /// Neighbours never move. Returns the resulting value.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::IndexOutOfRange`] for an index above 2.
    pub fn drag(&mut self, index: usize, delta: i32) -> Result<u16, ThresholdError> {
        let current = i32::from(self.get(index)?);
        let below = if index == 0 { 0 } else { self.values[index - 1] };
        let above = self
            .values
            .get(index + 1)
            .copied()
            .unwrap_or(MAX_VALUE + MIN_GAP);

        let lo = i32::from(below + MIN_GAP);
        let hi = i32::from(above - MIN_GAP);
        let next = current.saturating_add(delta).clamp(lo, hi);
        self.values[index] = u16::try_from(next).unwrap_or(self.values[index]);
        Ok(self.values[index])
    }

    /// Places boundary `index` at `value`, pushing neighbours outwards when
    /// they come closer than [`MIN_GAP`].
    ///
    /// `value` itself is clamped so the full set still fits `[MIN_GAP,
    /// MAX_VALUE]`.
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::IndexOutOfRange`] for an index above 2.
    pub fn set(&mut self, index: usize, value: u16) -> Result<u16, ThresholdError> {
        self.get(index)?;
        let v = &mut self.values;
        v[index] = value.clamp(Self::lower_bound(index), Self::upper_bound(index));

        for i in index + 1..THRESHOLD_COUNT {
            if v[i] < v[i - 1] + MIN_GAP {
                v[i] = v[i - 1] + MIN_GAP;
            }
        }
        for i in (0..index).rev() {
            if v[i] + MIN_GAP > v[i + 1] {
                v[i] = v[i + 1] - MIN_GAP;
            }
        }
        Ok(v[index])
    }

    /// The threshold command understood by the sensor firmware.
    #[must_use]
    pub fn encode(&self, feature_index: u16) -> String {
        let [t1, t2, t3] = self.values;
        format!("{feature_index:04}-{t1:04}-{t2:04}-{t3:04};")
    }

    /// Returns `true` when every gap holds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let [t1, t2, t3] = self.values;
        t1 >= MIN_GAP && t2 >= t1 + MIN_GAP && t3 >= t2 + MIN_GAP && t3 <= MAX_VALUE
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn lower_bound(index: usize) -> u16 {
        MIN_GAP * (index as u16 + 1)
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn upper_bound(index: usize) -> u16 {
        MAX_VALUE - MIN_GAP * (THRESHOLD_COUNT - 1 - index) as u16
    }
}

/// Sink for the threshold command, normally the connection manager.
pub trait PeripheralWriter: Send + Sync {
    /// Writes `payload` to the peripheral's UART receive characteristic.
    fn write_payload(&self, payload: Vec<u8>) -> impl Future<Output = BluetoothResult<()>> + Send;
}

/// What happened when an edit was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ThresholdCommit {
    /// All three boundaries were written to the store.
    pub persisted: bool,
    /// The command reached the peripheral.
    pub pushed: bool,
}

/// Owns the live threshold set and commits edits.
#[derive(Debug, Clone)]
pub struct ThresholdEditor {
    set: ThresholdSet,
    feature_index: u16,
}

impl ThresholdEditor {
    /// Creates an editor over `set`.
    #[must_use]
    pub const fn new(set: ThresholdSet, feature_index: u16) -> Self {
        Self { set, feature_index }
    }

    /// Loads stored boundaries, falling back to defaults per missing key.
    ///
    /// Store failures are logged and treated as "nothing stored".
    pub async fn load<G: PersistenceGateway>(gateway: &G, feature_index: u16) -> Self {
        let mut values = DEFAULT_THRESHOLDS;
        for (slot, value) in values.iter_mut().enumerate() {
            match gateway.load_threshold(storage_key(slot)).await {
                Ok(Some(stored)) => *value = stored,
                Ok(None) => {}
                Err(err) => warn!(error = %err, slot, "failed to load threshold, using default"),
            }
        }

        let set = ThresholdSet::normalized(values);
        if set.values() != values {
            debug!(stored = ?values, normalized = ?set.values(), "stored thresholds adjusted");
        }
        Self::new(set, feature_index)
    }

    /// The live set.
    #[must_use]
    pub const fn thresholds(&self) -> ThresholdSet {
        self.set
    }

    /// Feature index sent with every command.
    #[must_use]
    pub const fn feature_index(&self) -> u16 {
        self.feature_index
    }

    /// See [`ThresholdSet::drag`].
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::IndexOutOfRange`] for an index above 2.
    pub fn drag(&mut self, index: usize, delta: i32) -> Result<ThresholdSet, ThresholdError> {
        self.set.drag(index, delta)?;
        Ok(self.set)
    }

    /// See [`ThresholdSet::set`].
    ///
    /// # Errors
    ///
    /// Returns [`ThresholdError::IndexOutOfRange`] for an index above 2.
    pub fn set(&mut self, index: usize, value: u16) -> Result<ThresholdSet, ThresholdError> {
        self.set.set(index, value)?;
        Ok(self.set)
    }

    /// Persists every boundary and pushes the command to the peripheral.
    ///
    /// Neither failure is propagated; both are logged and reported in the
    /// returned [`ThresholdCommit`].
    pub async fn finish<G, W>(&self, gateway: &G, writer: &W) -> ThresholdCommit
    where
        G: PersistenceGateway,
        W: PeripheralWriter,
    {
        let mut persisted = true;
        for (slot, value) in self.set.values().into_iter().enumerate() {
            if let Err(err) = gateway.save_threshold(storage_key(slot), value).await {
                warn!(error = %err, slot, value, "failed to persist threshold");
                persisted = false;
            }
        }

        let command = self.set.encode(self.feature_index);
        let pushed = match writer.write_payload(command.clone().into_bytes()).await {
            Ok(()) => {
                info!(%command, "threshold command sent");
                true
            }
            Err(err) => {
                warn!(error = %err, %command, "threshold command not delivered");
                false
            }
        };

        ThresholdCommit { persisted, pushed }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn storage_key(slot: usize) -> u8 {
    slot as u8 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BluetoothError;
    use crate::storage::{MemoryStore, SqliteStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl PeripheralWriter for RecordingWriter {
        async fn write_payload(&self, payload: Vec<u8>) -> BluetoothResult<()> {
            if self.fail {
                return Err(BluetoothError::NotConnected);
            }
            self.written.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let set = ThresholdSet::default();
        assert_eq!(set.values(), [100, 750, 1500]);
        assert!(set.is_valid());
    }

    #[test]
    fn test_drag_within_bounds() {
        let mut set = ThresholdSet::default();
        assert_eq!(set.drag(1, 100).unwrap(), 850);
        assert_eq!(set.drag(1, -300).unwrap(), 550);
        assert_eq!(set.values(), [100, 550, 1500]);
    }

    #[test]
    fn test_drag_clamps_against_neighbours() {
        let mut set = ThresholdSet::default();
        assert_eq!(set.drag(1, -10_000).unwrap(), 150);
        assert_eq!(set.drag(1, 10_000).unwrap(), 1450);
        assert_eq!(set.drag(0, -10_000).unwrap(), 50);
        assert_eq!(set.drag(2, 10_000).unwrap(), MAX_VALUE);
        assert!(set.is_valid());
    }

    #[test]
    fn test_drag_sequences_preserve_invariant() {
        let mut set = ThresholdSet::default();
        let moves = [
            (0, 900),
            (2, -2000),
            (1, 400),
            (0, -37),
            (2, 5000),
            (1, -1),
            (0, 3000),
            (1, -999),
        ];
        for (index, delta) in moves {
            tokio_test::assert_ok!(set.drag(index, delta));
            assert!(set.is_valid(), "invalid after drag({index}, {delta}): {set:?}");
        }
    }

    #[test]
    fn test_drag_rejects_bad_index() {
        let mut set = ThresholdSet::default();
        assert_eq!(
            set.drag(3, 10),
            Err(ThresholdError::IndexOutOfRange { index: 3 })
        );
    }

    #[test]
    fn test_set_cascades_neighbours() {
        let mut set = ThresholdSet::default();
        tokio_test::assert_ok!(set.set(0, 1480));
        assert_eq!(set.values(), [1480, 1530, 1580]);
        assert!(set.is_valid());

        set.set(2, 60).unwrap();
        assert_eq!(set.values(), [50, 100, 150]);
        assert!(set.is_valid());
    }

    #[test]
    fn test_normalized_repairs_stored_values() {
        assert_eq!(ThresholdSet::normalized([0, 0, 0]).values(), [50, 100, 150]);
        assert_eq!(
            ThresholdSet::normalized([1800, 1800, 1800]).values(),
            [1700, 1750, 1800]
        );
        assert_eq!(
            ThresholdSet::normalized([100, 120, 900]).values(),
            [100, 150, 900]
        );
    }

    #[test]
    fn test_normalized_clamps_out_of_range_values() {
        let set = ThresholdSet::normalized([100, u16::MAX, 0]);
        assert!(set.is_valid(), "{set:?}");
        assert_eq!(set.values(), [100, 1750, 1800]);

        let set = ThresholdSet::normalized([u16::MAX, u16::MAX, u16::MAX]);
        assert_eq!(set.values(), [1700, 1750, 1800]);
    }

    #[tokio::test]
    async fn test_load_repairs_oversized_stored_value() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("db.sqlite")).unwrap();
        store.save_threshold(2, 65_500).await.unwrap();

        let editor = ThresholdEditor::load(&store, 0).await;
        let set = editor.thresholds();
        assert!(set.is_valid(), "{set:?}");
        assert_eq!(set.values(), [100, 1750, 1800]);
    }

    #[test]
    fn test_encode_command() {
        let set = ThresholdSet::normalized([60, 750, 1500]);
        assert_eq!(set.encode(0), "0000-0060-0750-1500;");
        assert_eq!(set.encode(3), "0003-0060-0750-1500;");
    }

    #[tokio::test]
    async fn test_load_uses_defaults_when_store_is_empty() {
        let store = MemoryStore::default();
        let editor = ThresholdEditor::load(&store, 0).await;
        assert_eq!(editor.thresholds(), ThresholdSet::default());
    }

    #[tokio::test]
    async fn test_finish_persists_and_pushes() {
        let store = MemoryStore::default();
        let writer = RecordingWriter::default();

        let mut editor = ThresholdEditor::load(&store, 1).await;
        editor.drag(0, 50).unwrap();
        let commit = editor.finish(&store, &writer).await;

        assert_eq!(
            commit,
            ThresholdCommit {
                persisted: true,
                pushed: true
            }
        );
        assert_eq!(store.load_threshold(1).await.unwrap(), Some(150));
        assert_eq!(store.load_threshold(3).await.unwrap(), Some(1500));
        assert_eq!(
            writer.written.lock().unwrap().as_slice(),
            &[b"0001-0150-0750-1500;".to_vec()]
        );

        let reloaded = ThresholdEditor::load(&store, 1).await;
        assert_eq!(reloaded.thresholds().values(), [150, 750, 1500]);
    }

    #[tokio::test]
    async fn test_finish_reports_failures_without_erroring() {
        let store = MemoryStore::default();
        store.fail_writes(true);
        let writer = RecordingWriter {
            fail: true,
            ..RecordingWriter::default()
        };

        let editor = ThresholdEditor::new(ThresholdSet::default(), 0);
        let commit = editor.finish(&store, &writer).await;
        assert!(!commit.persisted);
        assert!(!commit.pushed);
    }
}

//! Transport selection.
//!
//! [`Transport`] dispatches to BlueZ or to the in-process mock so one daemon
//! binary (and its tests) can run against either.

use blemonitor_core::connection::mock::MockLink;
use blemonitor_core::{
    BluetoothResult, GattAdapter, GattLink, LinkEventSender, MockGattAdapter, MonitorConfig,
};
use uuid::Uuid;

#[cfg(feature = "bluetooth")]
use blemonitor_core::connection::bluez::BluezLink;
#[cfg(feature = "bluetooth")]
use blemonitor_core::BluezAdapter;

/// BLE stack used by the daemon.
pub enum Transport {
    /// BlueZ over D-Bus.
    #[cfg(feature = "bluetooth")]
    Bluez(BluezAdapter),
    /// In-process peripheral.
    Mock(MockGattAdapter),
}

/// Link produced by [`Transport`].
pub enum TransportLink {
    /// BlueZ link.
    #[cfg(feature = "bluetooth")]
    Bluez(BluezLink),
    /// Mock link.
    Mock(MockLink),
}

impl Transport {
    /// Opens the transport this build prefers.
    ///
    /// BlueZ when compiled with `bluetooth` and without `mock-bluetooth`,
    /// otherwise a responsive mock peripheral.
    ///
    /// # Errors
    ///
    /// Returns an error if the Bluetooth daemon or adapter cannot be reached.
    #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
    pub async fn from_config(config: &MonitorConfig) -> anyhow::Result<Self> {
        Ok(Self::Bluez(
            BluezAdapter::new(config.bluetooth.adapter.as_deref()).await?,
        ))
    }

    /// Opens the transport this build prefers.
    ///
    /// BlueZ when compiled with `bluetooth` and without `mock-bluetooth`,
    /// otherwise a responsive mock peripheral.
    ///
    /// # Errors
    ///
    /// Never fails for the mock transport.
    #[cfg(not(all(feature = "bluetooth", not(feature = "mock-bluetooth"))))]
    #[allow(clippy::unused_async)]
    pub async fn from_config(config: &MonitorConfig) -> anyhow::Result<Self> {
        if config.bluetooth.adapter.is_some() {
            tracing::warn!("using the mock transport, bluetooth.adapter is ignored");
        }
        Ok(Self::Mock(MockGattAdapter::responsive()))
    }

    /// Short name for logs and the health endpoint.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "bluetooth")]
            Self::Bluez(_) => "bluez",
            Self::Mock(_) => "mock",
        }
    }
}

impl From<MockGattAdapter> for Transport {
    fn from(adapter: MockGattAdapter) -> Self {
        Self::Mock(adapter)
    }
}

impl GattAdapter for Transport {
    type Link = TransportLink;

    async fn is_available(&self) -> bool {
        match self {
            #[cfg(feature = "bluetooth")]
            Self::Bluez(a) => a.is_available().await,
            Self::Mock(a) => a.is_available().await,
        }
    }

    async fn open(
        &self,
        address: &str,
        auto_connect: bool,
        events: LinkEventSender,
    ) -> BluetoothResult<TransportLink> {
        match self {
            #[cfg(feature = "bluetooth")]
            Self::Bluez(a) => a
                .open(address, auto_connect, events)
                .await
                .map(TransportLink::Bluez),
            Self::Mock(a) => a
                .open(address, auto_connect, events)
                .await
                .map(TransportLink::Mock),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $link:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "bluetooth")]
            TransportLink::Bluez($link) => $call,
            TransportLink::Mock($link) => $call,
        }
    };
}

impl GattLink for TransportLink {
    async fn reconnect(&self) -> BluetoothResult<()> {
        dispatch!(self, link => link.reconnect().await)
    }

    async fn disconnect(&self) -> BluetoothResult<()> {
        dispatch!(self, link => link.disconnect().await)
    }

    async fn discover_services(&self) -> BluetoothResult<()> {
        dispatch!(self, link => link.discover_services().await)
    }

    async fn read_rssi(&self) -> BluetoothResult<i16> {
        dispatch!(self, link => link.read_rssi().await)
    }

    async fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> BluetoothResult<()> {
        dispatch!(self, link => link.enable_notifications(service, characteristic).await)
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: Vec<u8>) -> BluetoothResult<()> {
        dispatch!(self, link => link.write(service, characteristic, payload).await)
    }

    async fn close(&self) {
        dispatch!(self, link => link.close().await);
    }
}

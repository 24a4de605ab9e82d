//! Transport seam between the connection manager and a BLE stack.
//!
//! A transport reports everything that happens on a link asynchronously by
//! pushing [`LinkEvent`]s into the sender it was handed when the link was
//! opened. Methods only request work; completion arrives as an event.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::BluetoothResult;

/// Nordic UART service.
pub const NORDIC_UART_SERVICE: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Nordic UART RX characteristic (central writes).
pub const NORDIC_UART_RX: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Nordic UART TX characteristic (peripheral notifies).
pub const NORDIC_UART_TX: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Service and characteristics carrying the sensor's text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartProfile {
    /// UART service.
    pub service: Uuid,
    /// Characteristic the peripheral notifies on.
    pub tx: Uuid,
    /// Characteristic the central writes to.
    pub rx: Uuid,
}

impl Default for UartProfile {
    fn default() -> Self {
        Self {
            service: NORDIC_UART_SERVICE,
            tx: NORDIC_UART_TX,
            rx: NORDIC_UART_RX,
        }
    }
}

/// Something that happened on a link, reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link came up.
    Connected,
    /// The link went down.
    Disconnected,
    /// GATT services are resolved.
    ServicesDiscovered,
    /// A notification arrived on the UART TX characteristic.
    Data(Vec<u8>),
    /// A signal strength reading in dBm.
    Rssi(i16),
}

/// Where transports deliver [`LinkEvent`]s.
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

/// A BLE stack able to open GATT links.
pub trait GattAdapter: Send + Sync + 'static {
    /// Link type produced by [`GattAdapter::open`].
    type Link: GattLink;

    /// Whether the radio is present and powered.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Starts connecting to `address`. The link reports
    /// [`LinkEvent::Connected`] once it is up.
    ///
    /// `auto_connect` asks the stack to keep retrying in the background,
    /// used in dual mode.
    fn open(
        &self,
        address: &str,
        auto_connect: bool,
        events: LinkEventSender,
    ) -> impl Future<Output = BluetoothResult<Self::Link>> + Send;
}

/// One GATT link to a peripheral.
pub trait GattLink: Send + Sync + 'static {
    /// Reconnects an existing link.
    fn reconnect(&self) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Drops the connection but keeps the link usable for [`Self::reconnect`].
    fn disconnect(&self) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Requests service discovery, answered by [`LinkEvent::ServicesDiscovered`].
    fn discover_services(&self) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Reads the current signal strength in dBm.
    fn read_rssi(&self) -> impl Future<Output = BluetoothResult<i16>> + Send;

    /// Subscribes to notifications on `characteristic` of `service`.
    ///
    /// Fails with `CapabilityUnsupported` when either is missing.
    fn enable_notifications(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Writes `payload` to `characteristic` of `service`.
    ///
    /// Fails with `CapabilityUnsupported` when either is missing.
    fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Tears the link down for good.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nordic_uuids() {
        assert_eq!(
            NORDIC_UART_SERVICE.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(NORDIC_UART_RX.to_string(), "6e400002-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(NORDIC_UART_TX.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
    }
}

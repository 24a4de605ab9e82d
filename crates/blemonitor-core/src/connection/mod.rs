//! BLE connection lifecycle.
//!
//! [`ConnectionManager`] owns one GATT link and drives the
//! `Disconnected -> Connecting -> Connected` state machine:
//!
//! - transports push [`LinkEvent`]s into a channel drained by a single event
//!   loop task, which is the only place link events change state
//! - once connected, RSSI is polled every second and service discovery is
//!   requested; discovery enables notifications on the UART TX characteristic
//! - in dual mode a watchdog reconnects the link once if services are not
//!   discovered in time
//!
//! Consumers follow along through [`ConnectionManager::subscribe`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::is_valid_mac_address;
use crate::thresholds::PeripheralWriter;

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod mock;
pub mod transport;

pub use transport::{
    GattAdapter, GattLink, LinkEvent, LinkEventSender, UartProfile, NORDIC_UART_RX,
    NORDIC_UART_SERVICE, NORDIC_UART_TX,
};

/// Capacity of the [`ConnectionEvent`] broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Errors raised by the BLE layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BluetoothError {
    /// No adapter, or the adapter is powered off.
    #[error("No usable Bluetooth adapter. Ensure Bluetooth hardware is present and powered on.")]
    AdapterUnavailable,

    /// The address is empty or not a MAC address.
    #[error("Invalid Bluetooth address: '{address}'")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// The operation needs an established link.
    #[error("Not connected to a device")]
    NotConnected,

    /// The peripheral lacks the UART service or characteristic.
    #[error("Device does not support UART (service {service}, characteristic {characteristic})")]
    CapabilityUnsupported {
        /// Expected service.
        service: Uuid,
        /// Expected characteristic.
        characteristic: Uuid,
    },

    /// The BLE stack reported a failure.
    #[error("Bluetooth transport error: {message}")]
    Transport {
        /// Stack error message.
        message: String,
    },
}

/// Result alias for BLE operations.
pub type BluetoothResult<T> = Result<T, BluetoothError>;

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link requested, not up yet.
    Connecting,
    /// Link up.
    Connected,
}

/// Events published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The link came up.
    Connected,
    /// The link went down.
    Disconnected,
    /// GATT services are resolved.
    ServicesDiscovered,
    /// Raw bytes from the UART TX characteristic.
    DataAvailable(Vec<u8>),
    /// Signal strength in dBm.
    RssiRead(i16),
    /// The peripheral has no usable UART service.
    CapabilityUnsupported,
}

/// Timing and profile settings for [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// UART service layout.
    pub uart: UartProfile,
    /// Period of the RSSI poll, also the delay before the first read.
    pub rssi_interval: Duration,
    /// How long dual mode waits for service discovery before reconnecting.
    pub dual_mode_timeout: Duration,
    /// Initial dual mode flag.
    pub dual_mode: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            uart: UartProfile::default(),
            rssi_interval: Duration::from_millis(1000),
            dual_mode_timeout: Duration::from_millis(5000),
            dual_mode: false,
        }
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionStatus {
    /// Link state.
    pub state: ConnectionState,
    /// Address of the current or last link.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub address: Option<String>,
    /// Whether the dual mode watchdog is used for new links.
    pub dual_mode: bool,
    /// Whether a dual mode watchdog is currently armed.
    pub watchdog_armed: bool,
}

struct LinkState<L> {
    phase: ConnectionState,
    address: Option<String>,
    link: Option<Arc<L>>,
    dual_mode: bool,
    rssi_task: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl<L> LinkState<L> {
    fn cancel_rssi(&mut self) {
        if let Some(handle) = self.rssi_task.take() {
            handle.abort();
        }
    }

    fn cancel_watchdog(&mut self) -> bool {
        self.watchdog.take().is_some_and(|handle| {
            handle.abort();
            true
        })
    }
}

struct Shared<A: GattAdapter> {
    adapter: A,
    settings: ConnectionSettings,
    link_tx: LinkEventSender,
    events: broadcast::Sender<ConnectionEvent>,
    state: Mutex<LinkState<A::Link>>,
}

/// Owns the GATT link to the sensor. Clones share the same link.
pub struct ConnectionManager<A: GattAdapter> {
    shared: Arc<Shared<A>>,
}

impl<A: GattAdapter> Clone for ConnectionManager<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: GattAdapter> ConnectionManager<A> {
    /// Creates a manager and starts its event loop on the current runtime.
    #[must_use]
    pub fn new(adapter: A, settings: ConnectionSettings) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            adapter,
            settings,
            link_tx,
            events,
            state: Mutex::new(LinkState {
                phase: ConnectionState::Disconnected,
                address: None,
                link: None,
                dual_mode: settings.dual_mode,
                rssi_task: None,
                watchdog: None,
            }),
        });

        tokio::spawn(run_event_loop(Arc::downgrade(&shared), link_rx));

        Self { shared }
    }

    /// Receives every [`ConnectionEvent`] published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Current link state.
    pub async fn state(&self) -> ConnectionState {
        self.shared.state.lock().await.phase
    }

    /// Current link state with address and mode.
    pub async fn status(&self) -> ConnectionStatus {
        let st = self.shared.state.lock().await;
        ConnectionStatus {
            state: st.phase,
            address: st.address.clone(),
            dual_mode: st.dual_mode,
            watchdog_armed: st.watchdog.as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    /// Turns the dual mode watchdog on or off for links opened afterwards.
    pub async fn set_dual_mode(&self, enabled: bool) {
        self.shared.state.lock().await.dual_mode = enabled;
        info!(enabled, "dual mode updated");
    }

    /// Connects to `address`.
    ///
    /// An existing link to the same address is reused: left alone while it
    /// is connected or connecting, reconnected once it has dropped. A link
    /// to another address is closed first.
    ///
    /// # Errors
    ///
    /// - [`BluetoothError::AdapterUnavailable`] without a powered adapter
    /// - [`BluetoothError::InvalidAddress`] for an empty or malformed address
    /// - any transport error from opening the link
    pub async fn connect(&self, address: &str) -> BluetoothResult<()> {
        if !self.shared.adapter.is_available().await {
            warn!("connect requested without a usable adapter");
            return Err(BluetoothError::AdapterUnavailable);
        }

        let address = address.trim().to_uppercase();
        if !is_valid_mac_address(&address) {
            return Err(BluetoothError::InvalidAddress { address });
        }

        let mut st = self.shared.state.lock().await;

        if st.address.as_deref() == Some(address.as_str()) {
            if let Some(link) = st.link.clone() {
                if st.phase != ConnectionState::Disconnected {
                    debug!(%address, phase = ?st.phase, "link already up or coming up");
                    return Ok(());
                }
                info!(%address, "reusing existing link");
                link.reconnect().await?;
                st.phase = ConnectionState::Connecting;
                return Ok(());
            }
        }

        if let Some(old) = st.link.take() {
            st.cancel_rssi();
            st.cancel_watchdog();
            debug!(previous = ?st.address, "closing link to previous device");
            old.close().await;
        }

        info!(%address, dual_mode = st.dual_mode, "opening link");
        let link = self
            .shared
            .adapter
            .open(&address, st.dual_mode, self.shared.link_tx.clone())
            .await?;

        st.link = Some(Arc::new(link));
        st.address = Some(address);
        st.phase = ConnectionState::Connecting;
        if st.dual_mode {
            st.watchdog = Some(self.arm_watchdog());
        }
        Ok(())
    }

    /// Disconnects the link but keeps it for a later [`Self::connect`].
    ///
    /// The state turns `Disconnected` once the transport confirms.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the disconnect request fails.
    pub async fn disconnect(&self) -> BluetoothResult<()> {
        let mut st = self.shared.state.lock().await;
        st.cancel_rssi();
        st.cancel_watchdog();
        let Some(link) = st.link.clone() else {
            debug!("disconnect without a link");
            return Ok(());
        };
        info!(address = ?st.address, "disconnecting");
        link.disconnect().await
    }

    /// Drops the link entirely.
    pub async fn close(&self) {
        let mut st = self.shared.state.lock().await;
        st.cancel_rssi();
        st.cancel_watchdog();
        if let Some(link) = st.link.take() {
            info!(address = ?st.address, "closing link");
            link.close().await;
        }
        st.phase = ConnectionState::Disconnected;
    }

    /// Writes `payload` to the UART RX characteristic.
    ///
    /// # Errors
    ///
    /// - [`BluetoothError::NotConnected`] unless the link is up
    /// - [`BluetoothError::CapabilityUnsupported`] without a UART RX
    ///   characteristic, also published as an event
    pub async fn write(&self, payload: Vec<u8>) -> BluetoothResult<()> {
        let link = {
            let st = self.shared.state.lock().await;
            if st.phase != ConnectionState::Connected {
                return Err(BluetoothError::NotConnected);
            }
            st.link.clone().ok_or(BluetoothError::NotConnected)?
        };

        let uart = self.shared.settings.uart;
        match link.write(uart.service, uart.rx, payload).await {
            Err(err @ BluetoothError::CapabilityUnsupported { .. }) => {
                warn!(error = %err, "write target missing");
                self.shared.emit(ConnectionEvent::CapabilityUnsupported);
                Err(err)
            }
            other => other,
        }
    }

    fn arm_watchdog(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let timeout = self.shared.settings.dual_mode_timeout;
        debug!(?timeout, "dual mode watchdog armed");
        tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.watchdog_fired().await;
            }
        })
    }
}

impl<A: GattAdapter> PeripheralWriter for ConnectionManager<A> {
    async fn write_payload(&self, payload: Vec<u8>) -> BluetoothResult<()> {
        self.write(payload).await
    }
}

impl<A: GattAdapter> Shared<A> {
    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn handle(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.on_link_established().await,
            LinkEvent::Disconnected => self.on_link_lost().await,
            LinkEvent::ServicesDiscovered => self.on_services_discovered().await,
            LinkEvent::Data(bytes) => self.emit(ConnectionEvent::DataAvailable(bytes)),
            LinkEvent::Rssi(rssi) => self.emit(ConnectionEvent::RssiRead(rssi)),
        }
    }

    async fn on_link_established(&self) {
        let link = {
            let mut st = self.state.lock().await;
            let Some(link) = st.link.clone() else {
                debug!("connected event without a link");
                return;
            };
            st.phase = ConnectionState::Connected;
            st.cancel_rssi();
            st.rssi_task = Some(self.spawn_rssi_poll(Arc::clone(&link)));
            info!(address = ?st.address, "connected");
            link
        };

        self.emit(ConnectionEvent::Connected);

        if let Err(err) = link.discover_services().await {
            warn!(error = %err, "service discovery request failed");
        }
    }

    async fn on_link_lost(&self) {
        {
            let mut st = self.state.lock().await;
            st.phase = ConnectionState::Disconnected;
            st.cancel_rssi();
            info!(address = ?st.address, "disconnected");
        }
        self.emit(ConnectionEvent::Disconnected);
    }

    async fn on_services_discovered(&self) {
        let link = {
            let mut st = self.state.lock().await;
            if st.cancel_watchdog() {
                debug!("services discovered, watchdog disarmed");
            }
            st.link.clone()
        };

        self.emit(ConnectionEvent::ServicesDiscovered);

        let Some(link) = link else {
            return;
        };
        let uart = self.settings.uart;
        match link.enable_notifications(uart.service, uart.tx).await {
            Ok(()) => debug!("UART notifications enabled"),
            Err(err @ BluetoothError::CapabilityUnsupported { .. }) => {
                warn!(error = %err, "device does not support UART");
                self.emit(ConnectionEvent::CapabilityUnsupported);
            }
            Err(err) => warn!(error = %err, "failed to enable UART notifications"),
        }
    }

    async fn watchdog_fired(&self) {
        let mut st = self.state.lock().await;
        // This task owns the handle; dropping it disarms.
        st.watchdog = None;
        let Some(link) = st.link.clone() else {
            return;
        };

        warn!(
            timeout = ?self.settings.dual_mode_timeout,
            "services not discovered in time, reconnecting"
        );
        st.cancel_rssi();
        if let Err(err) = link.disconnect().await {
            warn!(error = %err, "watchdog disconnect failed");
        }
        match link.reconnect().await {
            Ok(()) => st.phase = ConnectionState::Connecting,
            Err(err) => warn!(error = %err, "watchdog reconnect failed"),
        }
    }

    fn spawn_rssi_poll(&self, link: Arc<A::Link>) -> JoinHandle<()> {
        let period = self.settings.rssi_interval;
        let tx = self.link_tx.clone();
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                match link.read_rssi().await {
                    Ok(rssi) => {
                        if tx.send(LinkEvent::Rssi(rssi)).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(error = %err, "RSSI read failed"),
                }
            }
        })
    }
}

async fn run_event_loop<A: GattAdapter>(
    shared: Weak<Shared<A>>,
    mut rx: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle(event).await;
    }
    debug!("connection event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::mock::{MockCall, MockGattAdapter};
    use super::*;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn manager(adapter: &MockGattAdapter) -> ConnectionManager<MockGattAdapter> {
        ConnectionManager::new(adapter.clone(), ConnectionSettings::default())
    }

    fn is_disconnect(call: &MockCall) -> bool {
        matches!(call, MockCall::Disconnect)
    }

    fn is_reconnect(call: &MockCall) -> bool {
        matches!(call, MockCall::Reconnect)
    }

    fn is_rssi(call: &MockCall) -> bool {
        matches!(call, MockCall::ReadRssi)
    }

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_lifecycle() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);
        let mut events = mgr.subscribe();

        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        mgr.connect(ADDR).await.unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Connecting);

        adapter.inject(LinkEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(mgr.state().await, ConnectionState::Connected);
        settle().await;
        assert_eq!(adapter.count(|c| matches!(c, MockCall::DiscoverServices)), 1);

        adapter.inject(LinkEvent::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_adapter_is_rejected() {
        let adapter = MockGattAdapter::new();
        adapter.set_available(false);
        let mgr = manager(&adapter);

        assert_eq!(
            mgr.connect(ADDR).await,
            Err(BluetoothError::AdapterUnavailable)
        );
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_bad_address_is_rejected() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        assert!(matches!(
            mgr.connect("").await,
            Err(BluetoothError::InvalidAddress { .. })
        ));
        assert!(matches!(
            mgr.connect("not-a-mac").await,
            Err(BluetoothError::InvalidAddress { .. })
        ));
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_to_same_address_reuses_link() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);
        settle().await;
        adapter.inject(LinkEvent::Disconnected);
        settle().await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);

        mgr.connect(&ADDR.to_lowercase()).await.unwrap();

        assert_eq!(adapter.count(|c| matches!(c, MockCall::Open { .. })), 1);
        assert_eq!(adapter.count(is_reconnect), 1);
        assert_eq!(mgr.state().await, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_keeps_link_up() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        mgr.connect(ADDR).await.unwrap();
        assert_eq!(adapter.count(is_reconnect), 0);

        adapter.inject(LinkEvent::Connected);
        settle().await;
        mgr.connect(ADDR).await.unwrap();

        assert_eq!(mgr.state().await, ConnectionState::Connected);
        assert_eq!(adapter.count(is_reconnect), 0);
        assert_eq!(adapter.count(|c| matches!(c, MockCall::Open { .. })), 1);
        mgr.write(b"0000-0100-0750-1500;".to_vec()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_to_new_address_closes_old_link() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        mgr.connect("11:22:33:44:55:66").await.unwrap();

        assert_eq!(adapter.count(|c| matches!(c, MockCall::Open { .. })), 2);
        assert_eq!(adapter.count(|c| matches!(c, MockCall::Close)), 1);
        assert_eq!(
            mgr.status().await.address.as_deref(),
            Some("11:22:33:44:55:66")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rssi_polled_every_second_while_connected() {
        let adapter = MockGattAdapter::new();
        adapter.set_rssi(-48);
        let mgr = manager(&adapter);
        let mut events = mgr.subscribe();

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);
        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(adapter.count(is_rssi), 3);

        let mut readings = 0;
        while let Ok(event) = events.try_recv() {
            if event == ConnectionEvent::RssiRead(-48) {
                readings += 1;
            }
        }
        assert_eq!(readings, 3);

        adapter.inject(LinkEvent::Disconnected);
        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(adapter.count(is_rssi), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_mode_discovery_in_time_cancels_watchdog() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);
        mgr.set_dual_mode(true).await;

        mgr.connect(ADDR).await.unwrap();
        assert!(mgr.status().await.watchdog_armed);
        assert_eq!(
            adapter.calls()[0],
            MockCall::Open {
                address: ADDR.to_string(),
                auto_connect: true
            }
        );

        adapter.inject(LinkEvent::Connected);
        time::sleep(Duration::from_millis(1000)).await;
        adapter.inject(LinkEvent::ServicesDiscovered);
        time::sleep(Duration::from_millis(20_000)).await;

        assert_eq!(adapter.count(is_disconnect), 0);
        assert_eq!(adapter.count(is_reconnect), 0);
        assert!(!mgr.status().await.watchdog_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dual_mode_timeout_reconnects_exactly_once() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);
        mgr.set_dual_mode(true).await;

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);

        time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(adapter.count(is_disconnect), 0);

        time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(adapter.count(is_disconnect), 1);
        assert_eq!(adapter.count(is_reconnect), 1);
        assert!(!mgr.status().await.watchdog_armed);

        // Late discovery after the watchdog fired is harmless.
        adapter.inject(LinkEvent::ServicesDiscovered);
        settle().await;
        assert_eq!(adapter.count(is_reconnect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_mode_never_arms_watchdog() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        time::sleep(Duration::from_millis(20_000)).await;

        assert!(!mgr.status().await.watchdog_armed);
        assert_eq!(adapter.count(is_reconnect), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_discovered_enables_uart_notifications() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);
        adapter.inject(LinkEvent::ServicesDiscovered);
        settle().await;

        assert_eq!(
            adapter.count(|c| *c
                == MockCall::EnableNotifications {
                    characteristic: NORDIC_UART_TX
                }),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_uart_reports_capability_unsupported() {
        let adapter = MockGattAdapter::new();
        adapter.set_uart(None);
        let mgr = manager(&adapter);
        let mut events = mgr.subscribe();

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::ServicesDiscovered);

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::ServicesDiscovered
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::CapabilityUnsupported
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_is_forwarded() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);
        let mut events = mgr.subscribe();

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Data(b"Idle".to_vec()));

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::DataAvailable(b"Idle".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_requires_connection() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        assert_eq!(
            mgr.write(b"0000-0100-0750-1500;".to_vec()).await,
            Err(BluetoothError::NotConnected)
        );

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);
        settle().await;

        mgr.write(b"0000-0100-0750-1500;".to_vec()).await.unwrap();
        assert_eq!(
            adapter.count(|c| matches!(
                c,
                MockCall::Write { characteristic, .. } if *characteristic == NORDIC_UART_RX
            )),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_link_and_timers() {
        let adapter = MockGattAdapter::new();
        let mgr = manager(&adapter);

        mgr.connect(ADDR).await.unwrap();
        adapter.inject(LinkEvent::Connected);
        settle().await;
        mgr.close().await;

        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(adapter.count(is_rssi), 0);

        mgr.connect(ADDR).await.unwrap();
        assert_eq!(adapter.count(|c| matches!(c, MockCall::Open { .. })), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_responsive_mock_reaches_connected() {
        let adapter = MockGattAdapter::responsive();
        let mgr = manager(&adapter);
        let mut events = mgr.subscribe();

        mgr.connect(ADDR).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::ServicesDiscovered
        );

        mgr.disconnect().await.unwrap();
        let mut saw_disconnect = false;
        while let Ok(event) = events.recv().await {
            if event == ConnectionEvent::Disconnected {
                saw_disconnect = true;
                break;
            }
        }
        assert!(saw_disconnect);
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }
}

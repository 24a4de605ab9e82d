//! In-process transport for tests and hardware-less runs.
//!
//! [`MockGattAdapter`] records every call it receives. By default it never
//! produces link events on its own; tests drive the link with
//! [`MockGattAdapter::inject`]. [`MockGattAdapter::responsive`] behaves like a
//! well-behaved peripheral instead: links come up, resolve their services and
//! go down when asked.

use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use super::transport::{GattAdapter, GattLink, LinkEvent, LinkEventSender, UartProfile};
use super::{BluetoothError, BluetoothResult};

/// A call received by the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// [`GattAdapter::open`].
    Open {
        /// Target address.
        address: String,
        /// Background reconnect requested.
        auto_connect: bool,
    },
    /// [`GattLink::reconnect`].
    Reconnect,
    /// [`GattLink::disconnect`].
    Disconnect,
    /// [`GattLink::discover_services`].
    DiscoverServices,
    /// [`GattLink::read_rssi`].
    ReadRssi,
    /// [`GattLink::enable_notifications`].
    EnableNotifications {
        /// Characteristic subscribed to.
        characteristic: Uuid,
    },
    /// [`GattLink::write`].
    Write {
        /// Characteristic written to.
        characteristic: Uuid,
        /// Bytes written.
        payload: Vec<u8>,
    },
    /// [`GattLink::close`].
    Close,
}

struct MockState {
    available: AtomicBool,
    responsive: bool,
    uart: Mutex<Option<UartProfile>>,
    rssi: AtomicI16,
    calls: Mutex<Vec<MockCall>>,
    sink: Mutex<Option<LinkEventSender>>,
}

/// Recording transport. Clones share state.
#[derive(Clone)]
pub struct MockGattAdapter {
    state: Arc<MockState>,
}

impl Default for MockGattAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockGattAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGattAdapter")
            .field("responsive", &self.state.responsive)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockGattAdapter {
    /// A passive mock: link events only arrive through [`Self::inject`].
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A mock that answers like a real peripheral.
    #[must_use]
    pub fn responsive() -> Self {
        Self::build(true)
    }

    fn build(responsive: bool) -> Self {
        Self {
            state: Arc::new(MockState {
                available: AtomicBool::new(true),
                responsive,
                uart: Mutex::new(Some(UartProfile::default())),
                rssi: AtomicI16::new(-60),
                calls: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Simulates the radio being present or not.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Sets which UART profile the peripheral exposes. `None` means none.
    pub fn set_uart(&self, uart: Option<UartProfile>) {
        *lock(&self.state.uart) = uart;
    }

    /// Value returned by subsequent RSSI reads.
    pub fn set_rssi(&self, rssi: i16) {
        self.state.rssi.store(rssi, Ordering::SeqCst);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.state.calls).iter().filter(|c| predicate(c)).count()
    }

    /// Delivers `event` on the most recently opened link.
    ///
    /// Returns `false` if no link was opened or the manager is gone.
    pub fn inject(&self, event: LinkEvent) -> bool {
        lock(&self.state.sink)
            .as_ref()
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    fn record(&self, call: MockCall) {
        debug!(?call, "mock transport call");
        lock(&self.state.calls).push(call);
    }
}

impl GattAdapter for MockGattAdapter {
    type Link = MockLink;

    async fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    async fn open(
        &self,
        address: &str,
        auto_connect: bool,
        events: LinkEventSender,
    ) -> BluetoothResult<MockLink> {
        self.record(MockCall::Open {
            address: address.to_string(),
            auto_connect,
        });
        *lock(&self.state.sink) = Some(events);

        let link = MockLink {
            adapter: self.clone(),
        };
        if self.state.responsive {
            link.emit(LinkEvent::Connected);
        }
        Ok(link)
    }
}

/// Link produced by [`MockGattAdapter`].
#[derive(Debug)]
pub struct MockLink {
    adapter: MockGattAdapter,
}

impl MockLink {
    fn emit(&self, event: LinkEvent) {
        self.adapter.inject(event);
    }

    fn check(&self, service: Uuid, characteristic: Uuid) -> BluetoothResult<()> {
        let supported = lock(&self.adapter.state.uart).is_some_and(|uart| {
            uart.service == service && (uart.tx == characteristic || uart.rx == characteristic)
        });
        if supported {
            Ok(())
        } else {
            Err(BluetoothError::CapabilityUnsupported {
                service,
                characteristic,
            })
        }
    }
}

impl GattLink for MockLink {
    async fn reconnect(&self) -> BluetoothResult<()> {
        self.adapter.record(MockCall::Reconnect);
        if self.adapter.state.responsive {
            self.emit(LinkEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> BluetoothResult<()> {
        self.adapter.record(MockCall::Disconnect);
        if self.adapter.state.responsive {
            self.emit(LinkEvent::Disconnected);
        }
        Ok(())
    }

    async fn discover_services(&self) -> BluetoothResult<()> {
        self.adapter.record(MockCall::DiscoverServices);
        if self.adapter.state.responsive {
            self.emit(LinkEvent::ServicesDiscovered);
        }
        Ok(())
    }

    async fn read_rssi(&self) -> BluetoothResult<i16> {
        self.adapter.record(MockCall::ReadRssi);
        Ok(self.adapter.state.rssi.load(Ordering::SeqCst))
    }

    async fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> BluetoothResult<()> {
        self.check(service, characteristic)?;
        self.adapter
            .record(MockCall::EnableNotifications { characteristic });
        Ok(())
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: Vec<u8>) -> BluetoothResult<()> {
        self.check(service, characteristic)?;
        self.adapter.record(MockCall::Write {
            characteristic,
            payload,
        });
        Ok(())
    }

    async fn close(&self) {
        self.adapter.record(MockCall::Close);
    }
}

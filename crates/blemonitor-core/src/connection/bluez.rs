//! BlueZ transport via `bluer` (Linux only).
//!
//! Connection attempts run in the background like an Android `connectGatt`
//! call: [`BluezAdapter::open`] returns immediately and the property watcher
//! reports `Connected`, `Disconnected` and `ServicesResolved` changes as
//! [`LinkEvent`]s.

use std::sync::{Mutex, MutexGuard};

use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{GattAdapter, GattLink, LinkEvent, LinkEventSender};
use super::{BluetoothError, BluetoothResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Stores `handle` in `slot`, aborting the task it replaces.
fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Some(previous) = lock(slot).replace(handle) {
        previous.abort();
    }
}

fn transport(err: &bluer::Error) -> BluetoothError {
    BluetoothError::Transport {
        message: err.to_string(),
    }
}

/// A BlueZ adapter.
pub struct BluezAdapter {
    adapter: Adapter,
    _session: Session,
}

impl BluezAdapter {
    /// Connects to `bluetoothd` and picks `adapter_name`, or the default
    /// adapter when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BluetoothError::AdapterUnavailable`] when the adapter cannot
    /// be found, or a transport error when the daemon is unreachable.
    pub async fn new(adapter_name: Option<&str>) -> BluetoothResult<Self> {
        let session = Session::new().await.map_err(|e| transport(&e))?;
        let adapter = match adapter_name {
            Some(name) => session
                .adapter(name)
                .map_err(|_| BluetoothError::AdapterUnavailable)?,
            None => session
                .default_adapter()
                .await
                .map_err(|_| BluetoothError::AdapterUnavailable)?,
        };

        info!(adapter = adapter.name(), "using Bluetooth adapter");
        Ok(Self {
            adapter,
            _session: session,
        })
    }
}

impl GattAdapter for BluezAdapter {
    type Link = BluezLink;

    async fn is_available(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn open(
        &self,
        address: &str,
        auto_connect: bool,
        events: LinkEventSender,
    ) -> BluetoothResult<BluezLink> {
        let addr: Address = address
            .parse()
            .map_err(|_| BluetoothError::InvalidAddress {
                address: address.to_string(),
            })?;
        let device = self.adapter.device(addr).map_err(|e| transport(&e))?;

        if auto_connect {
            if let Err(err) = device.set_trusted(true).await {
                warn!(error = %err, "could not mark device trusted");
            }
        }

        let link = BluezLink {
            device,
            events,
            tasks: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
        };
        link.spawn_property_watcher().await?;
        link.reconnect().await?;
        Ok(link)
    }
}

/// A GATT link to one BlueZ device.
pub struct BluezLink {
    device: Device,
    events: LinkEventSender,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    // One notification stream per link; services resolve again after a reconnect.
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl BluezLink {
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn spawn_property_watcher(&self) -> BluetoothResult<()> {
        let stream = self.device.events().await.map_err(|e| transport(&e))?;
        let tx = self.events.clone();
        self.track(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                let link_event = match event {
                    DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)) => {
                        LinkEvent::Connected
                    }
                    DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                        LinkEvent::Disconnected
                    }
                    DeviceEvent::PropertyChanged(DeviceProperty::ServicesResolved(true)) => {
                        LinkEvent::ServicesDiscovered
                    }
                    _ => continue,
                };
                if tx.send(link_event).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> BluetoothResult<Characteristic> {
        let unsupported = BluetoothError::CapabilityUnsupported {
            service,
            characteristic,
        };

        for svc in self.device.services().await.map_err(|e| transport(&e))? {
            if svc.uuid().await.map_err(|e| transport(&e))? != service {
                continue;
            }
            for ch in svc.characteristics().await.map_err(|e| transport(&e))? {
                if ch.uuid().await.map_err(|e| transport(&e))? == characteristic {
                    return Ok(ch);
                }
            }
            return Err(unsupported);
        }
        Err(unsupported)
    }
}

impl GattLink for BluezLink {
    async fn reconnect(&self) -> BluetoothResult<()> {
        let device = self.device.clone();
        self.track(tokio::spawn(async move {
            if let Err(err) = device.connect().await {
                warn!(error = %err, address = %device.address(), "connect attempt failed");
            }
        }));
        Ok(())
    }

    async fn disconnect(&self) -> BluetoothResult<()> {
        self.device.disconnect().await.map_err(|e| transport(&e))
    }

    async fn discover_services(&self) -> BluetoothResult<()> {
        // BlueZ resolves services on its own; report right away if it already has.
        if self
            .device
            .is_services_resolved()
            .await
            .map_err(|e| transport(&e))?
        {
            let _ = self.events.send(LinkEvent::ServicesDiscovered);
        }
        Ok(())
    }

    async fn read_rssi(&self) -> BluetoothResult<i16> {
        self.device
            .rssi()
            .await
            .map_err(|e| transport(&e))?
            .ok_or_else(|| BluetoothError::Transport {
                message: "RSSI not available".to_string(),
            })
    }

    async fn enable_notifications(&self, service: Uuid, characteristic: Uuid) -> BluetoothResult<()> {
        let ch = self.find_characteristic(service, characteristic).await?;
        let stream = ch.notify().await.map_err(|e| transport(&e))?;
        let tx = self.events.clone();
        replace_task(
            &self.notifier,
            tokio::spawn(async move {
                let mut stream = Box::pin(stream);
                while let Some(value) = stream.next().await {
                    if tx.send(LinkEvent::Data(value)).is_err() {
                        break;
                    }
                }
                debug!("notification stream ended");
            }),
        );
        Ok(())
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: Vec<u8>) -> BluetoothResult<()> {
        let ch = self.find_characteristic(service, characteristic).await?;
        ch.write(&payload).await.map_err(|e| transport(&e))
    }

    async fn close(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks.into_iter().chain(lock(&self.notifier).take()) {
            task.abort();
        }
        if let Err(err) = self.device.disconnect().await {
            debug!(error = %err, "disconnect on close failed");
        }
    }
}

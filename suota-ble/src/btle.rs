//! [`Transport`] over btleplug
//!
//! btleplug has no attribute handles, so characteristics get sequential
//! handles when services are browsed. Notifications and indications arrive on
//! the same btleplug stream and both land in the notification queue.

use std::collections::BTreeMap;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use suota_engine::transport::{
    CharacteristicRecord, DiscoveredDevice, GattValue, Handle, ReadResult, ServiceTable, TransportEvent,
    WriteStatus,
};
use suota_engine::{EventSink, Transport, TransportError};
use suota_proto::adv::{self, AdStructure};
use suota_proto::ble;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

fn backend(e: btleplug::Error) -> TransportError {
    TransportError::Backend(e.to_string())
}

/// Pick the adapter whose info contains `selector`, or the first one
pub async fn select_adapter(selector: Option<&str>) -> Result<Adapter, TransportError> {
    let manager = Manager::new().await.map_err(backend)?;
    let adapters = manager.adapters().await.map_err(backend)?;

    if let Some(selector) = selector {
        for adapter in &adapters {
            if let Ok(info) = adapter.adapter_info().await
                && info.contains(selector)
            {
                info!("using adapter {info}");
                return Ok(adapter.clone());
            }
        }
        warn!("no adapter matching {selector:?}, using the first one");
    }

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Backend("no Bluetooth adapter found".into()))
}

/// Rebuild an advertising payload from what btleplug kept of it. Flags are
/// not exposed and are left out.
pub fn advertising_data(props: &PeripheralProperties) -> Vec<u8> {
    let mut structures = Vec::new();

    let short: Vec<u16> = props
        .services
        .iter()
        .filter_map(|uuid| ble::short_uuid(uuid.as_u128()))
        .collect();
    if !short.is_empty() {
        structures.push(AdStructure::uuid16_list(true, &short));
    }

    let long: Vec<u8> = props
        .services
        .iter()
        .filter(|uuid| ble::short_uuid(uuid.as_u128()).is_none())
        .flat_map(|uuid| uuid.as_u128().to_le_bytes())
        .collect();
    if !long.is_empty() {
        structures.push(AdStructure::new(adv::AD_COMPLETE_UUID128, long));
    }

    let mut manufacturers: Vec<_> = props.manufacturer_data.iter().collect();
    manufacturers.sort_by_key(|(id, _)| **id);
    for (id, data) in manufacturers {
        structures.push(AdStructure::manufacturer(*id, data));
    }

    adv::encode(&structures)
}

fn device_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address.into_inner() == [0; 6] {
        // some platforms hide the address
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

/// Forwards adapter events for the whole lifetime of the transport
async fn forward_central_events(adapter: Adapter, sink: EventSink, target: watch::Receiver<Option<PeripheralId>>) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("cannot listen to adapter events: {e}");
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ManufacturerDataAdvertisement { id, .. }
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if let Ok(Some(props)) = peripheral.properties().await {
                    sink.discovered(DiscoveredDevice {
                        address: device_address(&peripheral),
                        advertising_data: advertising_data(&props),
                    });
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("connected: {id:?}");
                if target.borrow().as_ref() == Some(&id) {
                    sink.link_up();
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("disconnected: {id:?}");
                if target.borrow().as_ref() == Some(&id) {
                    sink.link_down();
                }
            }
            _ => {}
        }
    }
}

async fn forward_notifications(peripheral: Peripheral, sink: EventSink, handles: BTreeMap<Uuid, Handle>) {
    let mut notifications = match peripheral.notifications().await {
        Ok(notifications) => notifications,
        Err(e) => {
            warn!("cannot listen to notifications: {e}");
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        let Some(handle) = handles.get(&notification.uuid).copied() else {
            debug!("notification from unknown characteristic {}", notification.uuid);
            continue;
        };
        let value = GattValue { handle, value: notification.value };
        if sink.deliver(TransportEvent::Notification(value)).await.is_err() {
            break;
        }
    }
}

/// Pair items with handles 1, 2, ...; items past the last handle are dropped
fn sequential_handles<I: IntoIterator>(items: I) -> impl Iterator<Item = (Handle, I::Item)> {
    let mut items = items.into_iter().enumerate();
    std::iter::from_fn(move || {
        let (i, item) = items.next()?;
        match u16::try_from(i + 1) {
            Ok(handle) => Some((Handle(handle), item)),
            Err(_) => {
                warn!("more than {} characteristics, ignoring the rest", u16::MAX);
                None
            }
        }
    })
}

pub struct BtleTransport {
    adapter: Adapter,
    sink: EventSink,
    target: watch::Sender<Option<PeripheralId>>,
    peripheral: Option<Peripheral>,
    characteristics: BTreeMap<Handle, Characteristic>,
    central_task: JoinHandle<()>,
    connect_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
}

impl BtleTransport {
    pub fn new(adapter: Adapter, sink: EventSink) -> Self {
        let (target, target_rx) = watch::channel(None);
        let central_task = tokio::spawn(forward_central_events(adapter.clone(), sink.clone(), target_rx));
        Self {
            adapter,
            sink,
            target,
            peripheral: None,
            characteristics: BTreeMap::new(),
            central_task,
            connect_task: None,
            notify_task: None,
        }
    }

    fn peripheral(&self) -> Result<&Peripheral, TransportError> {
        self.peripheral.as_ref().ok_or(TransportError::NotConnected)
    }

    fn characteristic(&self, handle: Handle) -> Result<&Characteristic, TransportError> {
        self.characteristics.get(&handle).ok_or(TransportError::UnknownHandle(handle))
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.central_task.abort();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

impl Transport for BtleTransport {
    async fn start_scan(&mut self, signature: &[u8]) -> Result<(), TransportError> {
        let services = adv::parse(signature)
            .map_err(|e| TransportError::Backend(e.to_string()))?
            .iter()
            .flat_map(AdStructure::uuid16s)
            .map(|short| Uuid::from_u128(ble::uuid16(short)))
            .collect();
        self.adapter.start_scan(ScanFilter { services }).await.map_err(backend)?;

        // devices the adapter already knows about do not show up as new
        for peripheral in self.adapter.peripherals().await.map_err(backend)? {
            if let Ok(Some(props)) = peripheral.properties().await {
                self.sink.discovered(DiscoveredDevice {
                    address: device_address(&peripheral),
                    advertising_data: advertising_data(&props),
                });
            }
        }
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        let peripheral = self
            .adapter
            .peripherals()
            .await
            .map_err(backend)?
            .into_iter()
            .find(|p| device_address(p) == address)
            .ok_or_else(|| TransportError::UnknownDevice(address.to_string()))?;

        self.target.send_replace(Some(peripheral.id()));
        self.peripheral = Some(peripheral.clone());

        let sink = self.sink.clone();
        self.connect_task = Some(tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => sink.link_up(),
                Err(e) => warn!("connect failed: {e}"),
            }
        }));
        Ok(())
    }

    async fn cancel_connect(&mut self) -> Result<(), TransportError> {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn disconnect_all(&mut self) -> Result<(), TransportError> {
        self.cancel_connect().await?;
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.characteristics.clear();

        let result = match self.peripheral.take() {
            Some(peripheral) => match peripheral.is_connected().await {
                Ok(true) => peripheral.disconnect().await.map_err(backend),
                Ok(false) => Ok(()),
                Err(e) => Err(backend(e)),
            },
            None => Ok(()),
        };
        self.target.send_replace(None);
        self.sink.link_down();
        result
    }

    async fn browse_services(&mut self) -> Result<(), TransportError> {
        let peripheral = self.peripheral()?.clone();
        peripheral.discover_services().await.map_err(backend)?;

        let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
        self.characteristics = sequential_handles(peripheral.characteristics()).collect();

        let mut by_uuid = BTreeMap::new();
        let mut records = Vec::new();
        for (handle, c) in &self.characteristics {
            by_uuid.entry(c.uuid).or_insert(*handle);
            records.push(CharacteristicRecord { uuid: c.uuid, handle: *handle });
        }
        debug!("{} characteristics discovered", records.len());

        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.notify_task = Some(tokio::spawn(forward_notifications(peripheral, self.sink.clone(), by_uuid)));

        self.sink.services_browsed(ServiceTable {
            services,
            characteristics: records,
        });
        Ok(())
    }

    async fn read(&mut self, handle: Handle) -> Result<(), TransportError> {
        let value = self
            .peripheral()?
            .read(self.characteristic(handle)?)
            .await
            .map_err(backend)?;
        self.sink.deliver(TransportEvent::Read(ReadResult { handle, value })).await
    }

    async fn write(&mut self, handle: Handle, value: &[u8], ack: bool) -> Result<(), TransportError> {
        let write_type = if ack { WriteType::WithResponse } else { WriteType::WithoutResponse };
        self.peripheral()?
            .write(self.characteristic(handle)?, value, write_type)
            .await
            .map_err(backend)?;
        if ack {
            self.sink.deliver(TransportEvent::Write(WriteStatus { handle, code: 0 })).await?;
        }
        Ok(())
    }

    async fn subscribe(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.peripheral()?
            .subscribe(self.characteristic(handle)?)
            .await
            .map_err(backend)
    }
}

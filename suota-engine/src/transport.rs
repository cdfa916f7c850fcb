//! Seam between the SUOTA engine and a BLE central stack
//!
//! A [`Transport`] issues GATT operations. Everything the stack reports back
//! arrives later as a typed [`TransportEvent`] pushed into an [`EventSink`];
//! the engine consumes those from the matching queue of [`EventQueues`], one
//! queue per event category, each with a bounded wait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Attribute handle of a discovered characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u16);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Advertising report of a device seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub advertising_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub handle: Handle,
}

/// Result of a service browse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTable {
    pub services: Vec<Uuid>,
    pub characteristics: Vec<CharacteristicRecord>,
}

impl ServiceTable {
    pub fn has_service(&self, uuid: Uuid) -> bool {
        self.services.contains(&uuid)
    }

    pub fn handle_of(&self, uuid: Uuid) -> Option<Handle> {
        self.characteristics.iter().find(|c| c.uuid == uuid).map(|c| c.handle)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
    /// Connected and service browse complete
    Browsed(ServiceTable),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, LinkState::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub handle: Handle,
    pub value: Vec<u8>,
}

/// Confirmation of an acknowledged write, `code` 0 is success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStatus {
    pub handle: Handle,
    pub code: u8,
}

impl WriteStatus {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Value pushed by the device as a notification or indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattValue {
    pub handle: Handle,
    pub value: Vec<u8>,
}

/// Everything a transport reports asynchronously, decoded once at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Discovered(DiscoveredDevice),
    Link(LinkState),
    Read(ReadResult),
    Write(WriteStatus),
    Notification(GattValue),
    Indication(GattValue),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("no device with address {0}")]
    UnknownDevice(String),
    #[error("no characteristic with handle {0}")]
    UnknownHandle(Handle),
    #[error("event queue closed")]
    QueueClosed,
    #[error("{0}")]
    Backend(String),
}

/// GATT operations the engine needs from a BLE stack.
///
/// Calls only issue the operation. Results, confirmations and link changes are
/// reported through the [`EventSink`] handed to the transport on creation.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Start scanning; reports for devices whose advertising data may match
    /// `signature` are delivered as [`TransportEvent::Discovered`].
    async fn start_scan(&mut self, signature: &[u8]) -> Result<(), TransportError>;

    async fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Issue a connect; success shows up as [`LinkState::Connected`].
    async fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    async fn cancel_connect(&mut self) -> Result<(), TransportError>;

    async fn disconnect_all(&mut self) -> Result<(), TransportError>;

    /// Discover services; completion shows up as [`LinkState::Browsed`].
    async fn browse_services(&mut self) -> Result<(), TransportError>;

    /// Read a characteristic; the value arrives as [`TransportEvent::Read`].
    async fn read(&mut self, handle: Handle) -> Result<(), TransportError>;

    /// Write a characteristic. With `ack` the outcome arrives as
    /// [`TransportEvent::Write`], without it nothing is reported.
    async fn write(&mut self, handle: Handle, value: &[u8], ack: bool) -> Result<(), TransportError>;

    async fn subscribe(&mut self, handle: Handle) -> Result<(), TransportError>;
}

/// Producer side of the event queues, owned by the transport
#[derive(Clone)]
pub struct EventSink {
    discovered: mpsc::Sender<DiscoveredDevice>,
    reads: mpsc::Sender<ReadResult>,
    writes: mpsc::Sender<WriteStatus>,
    notifications: mpsc::Sender<GattValue>,
    indications: mpsc::Sender<GattValue>,
    link: Arc<watch::Sender<LinkState>>,
}

impl EventSink {
    pub async fn deliver(&self, event: TransportEvent) -> Result<(), TransportError> {
        let sent = match event {
            TransportEvent::Discovered(device) => self.discovered.send(device).await.is_ok(),
            TransportEvent::Link(state) => {
                self.link.send_replace(state);
                true
            }
            TransportEvent::Read(result) => self.reads.send(result).await.is_ok(),
            TransportEvent::Write(status) => self.writes.send(status).await.is_ok(),
            TransportEvent::Notification(value) => self.notifications.send(value).await.is_ok(),
            TransportEvent::Indication(value) => self.indications.send(value).await.is_ok(),
        };
        if sent { Ok(()) } else { Err(TransportError::QueueClosed) }
    }

    /// Queue a scan report without waiting; reports are dropped while the
    /// queue is full.
    pub fn discovered(&self, device: DiscoveredDevice) {
        let _ = self.discovered.try_send(device);
    }

    /// Mark the link up unless it already is (a browse result is kept)
    pub fn link_up(&self) {
        self.link.send_if_modified(|state| {
            if *state == LinkState::Disconnected {
                *state = LinkState::Connected;
                true
            } else {
                false
            }
        });
    }

    pub fn link_down(&self) {
        self.link.send_replace(LinkState::Disconnected);
    }

    pub fn services_browsed(&self, table: ServiceTable) {
        self.link.send_replace(LinkState::Browsed(table));
    }
}

/// Consumer side of the event queues, owned by the engine
pub struct EventQueues {
    discovered: mpsc::Receiver<DiscoveredDevice>,
    reads: mpsc::Receiver<ReadResult>,
    writes: mpsc::Receiver<WriteStatus>,
    notifications: mpsc::Receiver<GattValue>,
    indications: mpsc::Receiver<GattValue>,
    link: watch::Receiver<LinkState>,
}

/// Create a connected sink and queue set, every queue bounded to `capacity`
pub fn channel(capacity: usize) -> (EventSink, EventQueues) {
    let capacity = capacity.max(1);
    let (discovered_tx, discovered_rx) = mpsc::channel(capacity);
    let (reads_tx, reads_rx) = mpsc::channel(capacity);
    let (writes_tx, writes_rx) = mpsc::channel(capacity);
    let (notifications_tx, notifications_rx) = mpsc::channel(capacity);
    let (indications_tx, indications_rx) = mpsc::channel(capacity);
    let (link_tx, link_rx) = watch::channel(LinkState::Disconnected);

    let sink = EventSink {
        discovered: discovered_tx,
        reads: reads_tx,
        writes: writes_tx,
        notifications: notifications_tx,
        indications: indications_tx,
        link: Arc::new(link_tx),
    };
    let queues = EventQueues {
        discovered: discovered_rx,
        reads: reads_rx,
        writes: writes_rx,
        notifications: notifications_rx,
        indications: indications_rx,
        link: link_rx,
    };
    (sink, queues)
}

async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

impl EventQueues {
    pub async fn next_discovered(&mut self, timeout: Duration) -> Option<DiscoveredDevice> {
        recv_within(&mut self.discovered, timeout).await
    }

    pub async fn next_read(&mut self, timeout: Duration) -> Option<ReadResult> {
        recv_within(&mut self.reads, timeout).await
    }

    pub async fn next_write_status(&mut self, timeout: Duration) -> Option<WriteStatus> {
        recv_within(&mut self.writes, timeout).await
    }

    pub async fn next_notification(&mut self, timeout: Duration) -> Option<GattValue> {
        recv_within(&mut self.notifications, timeout).await
    }

    pub async fn next_indication(&mut self, timeout: Duration) -> Option<GattValue> {
        recv_within(&mut self.indications, timeout).await
    }

    /// Notifications already queued, without waiting
    pub fn drain_notifications(&mut self) -> Vec<GattValue> {
        drain(&mut self.notifications)
    }

    pub fn drain_indications(&mut self) -> Vec<GattValue> {
        drain(&mut self.indications)
    }

    /// Drop everything left over from a previous connection
    pub fn clear(&mut self) {
        drain(&mut self.discovered);
        drain(&mut self.reads);
        drain(&mut self.writes);
        drain(&mut self.notifications);
        drain(&mut self.indications);
    }

    pub fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.borrow().is_connected()
    }

    /// Wait until the link state satisfies `done`, at most `timeout`
    pub async fn wait_link(
        &mut self,
        timeout: Duration,
        done: impl FnMut(&LinkState) -> bool,
    ) -> Option<LinkState> {
        match tokio::time::timeout(timeout, self.link.wait_for(done)).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_land_in_their_own_queue() {
        let (sink, mut queues) = channel(4);
        let handle = Handle(0x21);

        sink.deliver(TransportEvent::Notification(GattValue { handle, value: vec![0x02] }))
            .await
            .unwrap();
        sink.deliver(TransportEvent::Read(ReadResult { handle, value: vec![0xF7, 0x00] }))
            .await
            .unwrap();

        let short = Duration::from_millis(20);
        assert!(queues.next_write_status(short).await.is_none());
        assert!(queues.next_indication(short).await.is_none());
        assert_eq!(queues.next_read(short).await.unwrap().value, vec![0xF7, 0x00]);
        assert_eq!(queues.drain_notifications().len(), 1);
        assert!(queues.drain_notifications().is_empty());
    }

    #[tokio::test]
    async fn link_up_keeps_browse_result() {
        let (sink, mut queues) = channel(1);
        assert!(!queues.is_connected());

        sink.link_up();
        assert_eq!(queues.link_state(), LinkState::Connected);

        sink.services_browsed(ServiceTable::default());
        sink.link_up();
        assert!(matches!(queues.link_state(), LinkState::Browsed(_)));

        let state = queues
            .wait_link(Duration::from_millis(20), |s| matches!(s, LinkState::Browsed(_)))
            .await;
        assert!(state.is_some());

        sink.link_down();
        assert!(!queues.is_connected());
        assert!(queues.wait_link(Duration::from_millis(20), LinkState::is_connected).await.is_none());
    }

    #[tokio::test]
    async fn full_scan_queue_drops_reports() {
        let (sink, mut queues) = channel(1);
        let device = DiscoveredDevice { address: "AA".into(), advertising_data: vec![] };
        sink.discovered(device.clone());
        sink.discovered(DiscoveredDevice { address: "BB".into(), advertising_data: vec![] });

        assert_eq!(queues.next_discovered(Duration::from_millis(20)).await, Some(device));
        assert!(queues.next_discovered(Duration::from_millis(20)).await.is_none());
    }

    #[test]
    fn service_table_lookup() {
        let uuid = Uuid::from_u128(suota_proto::ble::MTU_UUID);
        let table = ServiceTable {
            services: vec![Uuid::from_u128(suota_proto::ble::SERVICE_UUID)],
            characteristics: vec![CharacteristicRecord { uuid, handle: Handle(0x30) }],
        };
        assert!(table.has_service(Uuid::from_u128(suota_proto::ble::SERVICE_UUID)));
        assert_eq!(table.handle_of(uuid), Some(Handle(0x30)));
        assert_eq!(Handle(0x30).to_string(), "0030");
    }
}

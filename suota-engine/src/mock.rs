//! Scripted SUOTA peripheral for driving the engine in tests

use suota_proto::{STATUS_CMP_OK, STATUS_IMG_STARTED, adv, ble, mem_dev};
use uuid::Uuid;

use crate::transport::{
    CharacteristicRecord, DiscoveredDevice, EventSink, GattValue, Handle, ReadResult, ServiceTable,
    Transport, TransportError, TransportEvent, WriteStatus,
};

pub const ADDRESS: &str = "80:EA:CA:00:00:01";
pub const FIRMWARE_REVISION: Handle = Handle(0x30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    StartScan,
    StopScan,
    Connect(String),
    CancelConnect,
    DisconnectAll,
    Browse,
    Read(Handle),
    Write { handle: Handle, value: Vec<u8>, ack: bool },
    Subscribe(Handle),
}

/// How the simulated device behaves
#[derive(Debug, Clone)]
pub struct Script {
    pub advertising_data: Vec<u8>,
    pub accepts_connection: bool,
    pub completes_browse: bool,
    pub has_suota_service: bool,
    pub mtu: u16,
    pub pd_char_size: u16,
    pub suota_version: u8,
    pub firmware_revision: Option<Vec<u8>>,
    pub answers_reads: bool,
    pub start_status: u8,
    /// Status for the block with this index instead of CMP_OK
    pub block_status: Option<(usize, u8)>,
    /// Extra status queued right after the confirmation of this block
    pub trailing_status: Option<(usize, u8)>,
    /// Link drops once this block is confirmed
    pub drops_link_after_block: Option<usize>,
    /// Index of the patch data write that fails
    pub failing_chunk: Option<usize>,
    pub end_status: u8,
    pub acks_patch_length: bool,
    pub disconnects_on_reboot: bool,
    pub drops_link_on_disconnect: bool,
    pub rejects_connect: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            advertising_data: adv::SUOTA_SIGNATURE.to_vec(),
            accepts_connection: true,
            completes_browse: true,
            has_suota_service: true,
            mtu: 247,
            pd_char_size: 244,
            suota_version: 0x0B,
            firmware_revision: Some(b"v_6.0.14\0".to_vec()),
            answers_reads: true,
            start_status: STATUS_IMG_STARTED,
            block_status: None,
            trailing_status: None,
            drops_link_after_block: None,
            failing_chunk: None,
            end_status: STATUS_CMP_OK,
            acks_patch_length: true,
            disconnects_on_reboot: true,
            drops_link_on_disconnect: true,
            rejects_connect: false,
        }
    }
}

pub fn suota_handle(uuid: u128) -> Handle {
    let index = ble::SUOTA_CHARACTERISTICS
        .iter()
        .position(|(_, u)| *u == uuid)
        .unwrap_or(0xFF);
    Handle(0x10 + index as u16)
}

pub struct MockDevice {
    sink: EventSink,
    pub script: Script,
    pub ops: Vec<Op>,
    /// Patch data in arrival order
    pub received: Vec<u8>,
    /// Every block length written to SUOTA_PATCH_LEN
    pub patch_lengths: Vec<u16>,
    patch_length: usize,
    block_fill: usize,
    blocks: usize,
    chunks: usize,
}

impl MockDevice {
    pub fn new(sink: EventSink, script: Script) -> Self {
        Self {
            sink,
            script,
            ops: Vec::new(),
            received: Vec::new(),
            patch_lengths: Vec::new(),
            patch_length: 0,
            block_fill: 0,
            blocks: 0,
            chunks: 0,
        }
    }

    pub fn patch_data_writes(&self) -> usize {
        let handle = suota_handle(ble::PATCH_DATA_UUID);
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Write { handle: h, .. } if *h == handle))
            .count()
    }

    pub fn disconnects(&self) -> usize {
        self.ops.iter().filter(|op| **op == Op::DisconnectAll).count()
    }

    fn table(&self) -> ServiceTable {
        let mut services = vec![Uuid::from_u128(ble::uuid16(0x180A))];
        let mut characteristics = Vec::new();
        if self.script.firmware_revision.is_some() {
            characteristics.push(CharacteristicRecord {
                uuid: Uuid::from_u128(ble::DIS_FIRMWARE_REVISION_UUID),
                handle: FIRMWARE_REVISION,
            });
        }
        if self.script.has_suota_service {
            services.push(Uuid::from_u128(ble::SERVICE_UUID));
            characteristics.extend(ble::SUOTA_CHARACTERISTICS.iter().map(|(_, uuid)| CharacteristicRecord {
                uuid: Uuid::from_u128(*uuid),
                handle: suota_handle(*uuid),
            }));
        }
        ServiceTable { services, characteristics }
    }

    async fn status(&self, handle: Handle, code: u8) -> Result<(), TransportError> {
        self.sink
            .deliver(TransportEvent::Notification(GattValue { handle, value: vec![code] }))
            .await
    }

    async fn on_mem_dev(&mut self, value: &[u8]) -> Result<(), TransportError> {
        let serv_status = suota_handle(ble::SERV_STATUS_UUID);
        if value == mem_dev::START_SPI_BANK0 {
            self.status(serv_status, self.script.start_status).await?;
        } else if value == mem_dev::END {
            self.status(serv_status, self.script.end_status).await?;
        } else if value == mem_dev::REBOOT && self.script.disconnects_on_reboot {
            self.sink.link_down();
        }
        Ok(())
    }

    async fn on_patch_data(&mut self, value: &[u8]) -> Result<(), TransportError> {
        self.received.extend_from_slice(value);
        self.block_fill += value.len();
        if self.block_fill >= self.patch_length {
            let code = match self.script.block_status {
                Some((index, code)) if index == self.blocks => code,
                _ => STATUS_CMP_OK,
            };
            let serv_status = suota_handle(ble::SERV_STATUS_UUID);
            self.status(serv_status, code).await?;
            if let Some((index, code)) = self.script.trailing_status
                && index == self.blocks
            {
                self.status(serv_status, code).await?;
            }
            if self.script.drops_link_after_block == Some(self.blocks) {
                self.sink.link_down();
            }
            self.block_fill = 0;
            self.blocks += 1;
        }
        Ok(())
    }
}

impl Transport for MockDevice {
    async fn start_scan(&mut self, _signature: &[u8]) -> Result<(), TransportError> {
        self.ops.push(Op::StartScan);
        self.sink.discovered(DiscoveredDevice {
            address: "11:22:33:44:55:66".into(),
            advertising_data: vec![0x02, 0x01, 0x06],
        });
        self.sink.discovered(DiscoveredDevice {
            address: ADDRESS.into(),
            advertising_data: self.script.advertising_data.clone(),
        });
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.ops.push(Op::StopScan);
        Ok(())
    }

    async fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        self.ops.push(Op::Connect(address.to_string()));
        if self.script.rejects_connect {
            return Err(TransportError::Backend("connection refused".into()));
        }
        if self.script.accepts_connection {
            self.sink.link_up();
        }
        Ok(())
    }

    async fn cancel_connect(&mut self) -> Result<(), TransportError> {
        self.ops.push(Op::CancelConnect);
        Ok(())
    }

    async fn disconnect_all(&mut self) -> Result<(), TransportError> {
        self.ops.push(Op::DisconnectAll);
        if self.script.drops_link_on_disconnect {
            self.sink.link_down();
        }
        Ok(())
    }

    async fn browse_services(&mut self) -> Result<(), TransportError> {
        self.ops.push(Op::Browse);
        if self.script.completes_browse {
            self.sink.services_browsed(self.table());
        }
        Ok(())
    }

    async fn read(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.ops.push(Op::Read(handle));
        let value = if handle == suota_handle(ble::MTU_UUID) {
            self.script.mtu.to_le_bytes().to_vec()
        } else if handle == suota_handle(ble::PD_CHAR_SIZE_UUID) {
            self.script.pd_char_size.to_le_bytes().to_vec()
        } else if handle == suota_handle(ble::VERSION_UUID) {
            vec![self.script.suota_version]
        } else if let (FIRMWARE_REVISION, Some(revision)) = (handle, &self.script.firmware_revision) {
            revision.clone()
        } else {
            return Err(TransportError::UnknownHandle(handle));
        };

        if self.script.answers_reads {
            self.sink.deliver(TransportEvent::Read(ReadResult { handle, value })).await?;
        }
        Ok(())
    }

    async fn write(&mut self, handle: Handle, value: &[u8], ack: bool) -> Result<(), TransportError> {
        self.ops.push(Op::Write { handle, value: value.to_vec(), ack });

        let patch_len = handle == suota_handle(ble::PATCH_LEN_UUID);
        if patch_len {
            let length = u16::from_le_bytes([value[0], value[1]]);
            self.patch_length = usize::from(length);
            self.patch_lengths.push(length);
        }
        if ack && (!patch_len || self.script.acks_patch_length) {
            self.sink.deliver(TransportEvent::Write(WriteStatus { handle, code: 0 })).await?;
        }

        if handle == suota_handle(ble::MEM_DEV_UUID) {
            self.on_mem_dev(value).await?;
        } else if handle == suota_handle(ble::PATCH_DATA_UUID) {
            let index = self.chunks;
            self.chunks += 1;
            if self.script.failing_chunk == Some(index) {
                return Err(TransportError::Backend("write failed".into()));
            }
            self.on_patch_data(value).await?;
        }
        Ok(())
    }

    async fn subscribe(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.ops.push(Op::Subscribe(handle));
        Ok(())
    }
}

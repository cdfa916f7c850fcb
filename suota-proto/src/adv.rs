//! Advertising data structures and the SUOTA advertising signature

use std::io;

pub const AD_FLAGS: u8 = 0x01;
pub const AD_INCOMPLETE_UUID16: u8 = 0x02;
pub const AD_COMPLETE_UUID16: u8 = 0x03;
pub const AD_INCOMPLETE_UUID128: u8 = 0x06;
pub const AD_COMPLETE_UUID128: u8 = 0x07;
pub const AD_MANUFACTURER: u8 = 0xFF;

/// Advertised by a dongle waiting in SUOTA mode: flags, Smart Sensor Devices
/// manufacturer id and the 0xFEF5 service
pub const SUOTA_SIGNATURE: [u8; 11] = [
    0x02, AD_FLAGS, 0x06, //
    0x03, AD_MANUFACTURER, 0x5B, 0x07, //
    0x03, AD_INCOMPLETE_UUID16, 0xF5, 0xFE,
];

/// One length-type-value element of an advertising payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdStructure {
    pub ad_type: u8,
    pub data: Vec<u8>,
}

impl AdStructure {
    pub fn new(ad_type: u8, data: Vec<u8>) -> Self {
        Self { ad_type, data }
    }

    pub fn manufacturer(company_id: u16, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(2 + payload.len());
        data.extend_from_slice(&company_id.to_le_bytes());
        data.extend_from_slice(payload);
        Self::new(AD_MANUFACTURER, data)
    }

    pub fn uuid16_list(complete: bool, uuids: &[u16]) -> Self {
        let ad_type = if complete { AD_COMPLETE_UUID16 } else { AD_INCOMPLETE_UUID16 };
        Self::new(ad_type, uuids.iter().flat_map(|u| u.to_le_bytes()).collect())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.data.len());
        buf.push((self.data.len() + 1) as u8);
        buf.push(self.ad_type);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// UUIDs of a 16-bit service list, empty for other types
    pub fn uuid16s(&self) -> Vec<u16> {
        match self.ad_type {
            AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => self
                .data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn is_uuid16_list(&self) -> bool {
        matches!(self.ad_type, AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16)
    }

    fn is_uuid128_list(&self) -> bool {
        matches!(self.ad_type, AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128)
    }
}

/// Split an advertising payload into its structures.
/// A zero length byte ends the payload (the rest is padding).
pub fn parse(data: &[u8]) -> io::Result<Vec<AdStructure>> {
    let mut structures = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let len = data[pos] as usize;
        if len == 0 {
            break;
        }
        if pos + 1 + len > data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "advertising structure truncated"));
        }
        structures.push(AdStructure {
            ad_type: data[pos + 1],
            data: data[pos + 2..pos + 1 + len].to_vec(),
        });
        pos += 1 + len;
    }

    Ok(structures)
}

pub fn encode(structures: &[AdStructure]) -> Vec<u8> {
    structures.iter().flat_map(AdStructure::to_bytes).collect()
}

/// Does `advertised` carry every element of `signature`?
///
/// Flags are ignored since most host stacks do not surface them. Complete and
/// incomplete service lists are interchangeable and only need to contain the
/// signature's UUIDs. Manufacturer data must start with the signature's
/// company id and payload. Any other type must match exactly.
pub fn matches(signature: &[u8], advertised: &[u8]) -> bool {
    let (Ok(wanted), Ok(seen)) = (parse(signature), parse(advertised)) else {
        return false;
    };

    wanted
        .iter()
        .filter(|w| w.ad_type != AD_FLAGS)
        .all(|w| seen.iter().any(|s| element_matches(w, s)))
}

fn element_matches(wanted: &AdStructure, seen: &AdStructure) -> bool {
    if wanted.is_uuid16_list() {
        let have = seen.uuid16s();
        return seen.is_uuid16_list() && wanted.uuid16s().iter().all(|u| have.contains(u));
    }
    if wanted.is_uuid128_list() {
        return seen.is_uuid128_list()
            && wanted
                .data
                .chunks_exact(16)
                .all(|w| seen.data.chunks_exact(16).any(|s| s == w));
    }
    if wanted.ad_type == AD_MANUFACTURER {
        return seen.ad_type == AD_MANUFACTURER && seen.data.starts_with(&wanted.data);
    }
    wanted == seen
}

//! Firmware image loading

use std::path::Path;

use suota_proto::{CHECKSUM_SIZE, MAX_IMAGE_SIZE, checksum};

use crate::SuotaError;

/// Firmware payload with its trailing checksum byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SuotaError> {
        let path = path.as_ref();
        let payload = std::fs::read(path).map_err(|source| SuotaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_payload(payload)
    }

    pub fn from_payload(mut payload: Vec<u8>) -> Result<Self, SuotaError> {
        if payload.is_empty() {
            return Err(SuotaError::EmptyImage);
        }
        if payload.len() > MAX_IMAGE_SIZE {
            return Err(SuotaError::ImageTooLarge {
                size: payload.len(),
                max: MAX_IMAGE_SIZE,
            });
        }

        let sum = checksum(&payload);
        payload.push(sum);
        Ok(Self { bytes: payload })
    }

    /// Length on the wire, checksum included
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - CHECKSUM_SIZE]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - CHECKSUM_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }
}

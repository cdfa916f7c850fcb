use std::fmt;

use suota_proto::ATT_HEADER_SIZE;

use crate::SuotaError;
use crate::gatt::Gatt;
use crate::transport::{Handle, Transport};

/// Block and chunk sizes negotiated with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParameters {
    pub mtu_size: usize,
    pub patch_characteristic_size: usize,
    pub chunk_size: usize,
    pub block_size: usize,
}

impl TransferParameters {
    /// Chunks fill one write (MTU minus ATT header, capped by the patch data
    /// characteristic); a block is as many whole chunks as fit in the MTU.
    pub fn derive(mtu_size: usize, patch_characteristic_size: usize) -> Result<Self, SuotaError> {
        let chunk_size = mtu_size.saturating_sub(ATT_HEADER_SIZE).min(patch_characteristic_size);
        if chunk_size == 0 {
            return Err(SuotaError::InvalidParameters {
                mtu: mtu_size,
                patch_size: patch_characteristic_size,
            });
        }

        let block_size = if chunk_size > mtu_size {
            chunk_size
        } else {
            (mtu_size / chunk_size) * chunk_size
        };

        // block lengths travel as u16 on the wire
        if block_size > usize::from(u16::MAX) {
            return Err(SuotaError::InvalidParameters {
                mtu: mtu_size,
                patch_size: patch_characteristic_size,
            });
        }

        Ok(Self {
            mtu_size,
            patch_characteristic_size,
            chunk_size,
            block_size,
        })
    }
}

impl fmt::Display for TransferParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mtu {}, patch data size {}, chunk {}, block {}",
            self.mtu_size, self.patch_characteristic_size, self.chunk_size, self.block_size
        )
    }
}

/// Read the device's MTU and patch data size and derive the transfer sizes
pub async fn negotiate<T: Transport>(
    gatt: &mut Gatt<'_, T>,
    mtu_handle: Handle,
    pd_char_size_handle: Handle,
) -> Result<TransferParameters, SuotaError> {
    let mtu = gatt.read_uint(mtu_handle, "SUOTA_MTU").await? as usize;
    log::debug!("MTU_SIZE: {mtu}");

    let pd_char_size = gatt.read_uint(pd_char_size_handle, "SUOTA_PD_CHAR_SIZE").await? as usize;
    log::debug!("PD_CHAR_SIZE: {pd_char_size}");

    TransferParameters::derive(mtu, pd_char_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_for_large_mtu() {
        let params = TransferParameters::derive(247, 244).unwrap();
        assert_eq!(params.chunk_size, 244);
        assert_eq!(params.block_size, 244);
    }

    #[test]
    fn block_is_largest_multiple_of_chunk() {
        let params = TransferParameters::derive(512, 120).unwrap();
        assert_eq!(params.chunk_size, 120);
        assert_eq!(params.block_size, 480);

        let params = TransferParameters::derive(23, 244).unwrap();
        assert_eq!(params.chunk_size, 20);
        assert_eq!(params.block_size, 20);
    }

    #[test]
    fn derived_sizes_hold_invariants() {
        for mtu in 4..600 {
            for pd in [1, 20, 64, 120, 244, 509] {
                let params = TransferParameters::derive(mtu, pd).unwrap();
                assert_eq!(params.chunk_size, (mtu - 3).min(pd));
                assert!(params.block_size >= params.chunk_size);
                assert_eq!(params.block_size % params.chunk_size, 0);
                assert!(params.block_size <= mtu);
                assert!(params.block_size + params.chunk_size > mtu);
            }
        }
    }

    #[test]
    fn zero_chunk_is_rejected() {
        assert!(matches!(
            TransferParameters::derive(3, 244),
            Err(SuotaError::InvalidParameters { mtu: 3, .. })
        ));
        assert!(TransferParameters::derive(247, 0).is_err());
    }
}

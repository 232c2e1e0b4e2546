//! Compiled kernel descriptor
//!
//! The dispatch packet's `kernel_object` points at a 256-byte kernel code
//! descriptor emitted by the finalizer. Only the fields needed to describe a
//! launch's resource usage are decoded.

use super::DecodeError;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Size of a kernel code descriptor in bytes
pub const KERNEL_CODE_SIZE: usize = 256;

const GROUP_SEGMENT_OFFSET: usize = 64;
const SGPR_COUNT_OFFSET: usize = 84;
const WAVEFRONT_SIZE_OFFSET: usize = 103;

/// Resource-usage view of a kernel code descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KernelCodeDescriptor {
    pub version_major: u32,
    pub version_minor: u32,
    pub machine_kind: u16,
    pub kernel_code_entry_byte_offset: i64,
    pub workitem_private_segment_byte_size: u32,

    /// Local (LDS) memory used per work-group
    pub workgroup_group_segment_byte_size: u32,
    pub kernarg_segment_byte_size: u64,

    /// Scalar registers used per wavefront
    pub wavefront_sgpr_count: u16,

    /// Vector registers used per work-item
    pub workitem_vgpr_count: u16,

    /// log2 of the wavefront size
    pub wavefront_size: u8,
}

impl KernelCodeDescriptor {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < KERNEL_CODE_SIZE {
            return Err(DecodeError::Truncated {
                what: "kernel code descriptor",
                expected: KERNEL_CODE_SIZE,
                actual: raw.len(),
            });
        }

        let mut buf = &raw[..KERNEL_CODE_SIZE];
        let version_major = buf.get_u32_le();
        let version_minor = buf.get_u32_le();
        let machine_kind = buf.get_u16_le();
        buf.advance(6); // machine version major/minor/stepping
        let kernel_code_entry_byte_offset = buf.get_i64_le();
        buf.advance(36); // prefetch, scratch backing, pgm_rsrc1/2, properties
        let workitem_private_segment_byte_size = buf.get_u32_le();
        let workgroup_group_segment_byte_size = buf.get_u32_le();
        buf.advance(4); // gds_segment_byte_size
        let kernarg_segment_byte_size = buf.get_u64_le();
        buf.advance(4); // workgroup_fbarrier_count
        let wavefront_sgpr_count = buf.get_u16_le();
        let workitem_vgpr_count = buf.get_u16_le();

        Ok(Self {
            version_major,
            version_minor,
            machine_kind,
            kernel_code_entry_byte_offset,
            workitem_private_segment_byte_size,
            workgroup_group_segment_byte_size,
            kernarg_segment_byte_size,
            wavefront_sgpr_count,
            workitem_vgpr_count,
            wavefront_size: raw[WAVEFRONT_SIZE_OFFSET],
        })
    }

    /// Encode into a zero-filled descriptor image. Fields this type does not
    /// model are left zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = vec![0u8; KERNEL_CODE_SIZE];
        {
            let mut head = &mut raw[..];
            head.put_u32_le(self.version_major);
            head.put_u32_le(self.version_minor);
            head.put_u16_le(self.machine_kind);
        }
        (&mut raw[16..24]).put_i64_le(self.kernel_code_entry_byte_offset);
        (&mut raw[60..64]).put_u32_le(self.workitem_private_segment_byte_size);
        (&mut raw[GROUP_SEGMENT_OFFSET..GROUP_SEGMENT_OFFSET + 4])
            .put_u32_le(self.workgroup_group_segment_byte_size);
        (&mut raw[72..80]).put_u64_le(self.kernarg_segment_byte_size);
        (&mut raw[SGPR_COUNT_OFFSET..SGPR_COUNT_OFFSET + 2]).put_u16_le(self.wavefront_sgpr_count);
        (&mut raw[SGPR_COUNT_OFFSET + 2..SGPR_COUNT_OFFSET + 4]).put_u16_le(self.workitem_vgpr_count);
        raw[WAVEFRONT_SIZE_OFFSET] = self.wavefront_size;
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_resource_fields() {
        let mut raw = vec![0u8; KERNEL_CODE_SIZE];
        raw[0] = 1; // version major
        raw[64..68].copy_from_slice(&4096u32.to_le_bytes());
        raw[84..86].copy_from_slice(&24u16.to_le_bytes());
        raw[86..88].copy_from_slice(&36u16.to_le_bytes());
        raw[103] = 6;

        let desc = KernelCodeDescriptor::from_bytes(&raw).unwrap();
        assert_eq!(desc.version_major, 1);
        assert_eq!(desc.workgroup_group_segment_byte_size, 4096);
        assert_eq!(desc.wavefront_sgpr_count, 24);
        assert_eq!(desc.workitem_vgpr_count, 36);
        assert_eq!(desc.wavefront_size, 6);
    }

    #[test]
    fn test_encode_places_fields_at_abi_offsets() {
        let desc = KernelCodeDescriptor {
            version_major: 1,
            kernel_code_entry_byte_offset: 256,
            workgroup_group_segment_byte_size: 512,
            kernarg_segment_byte_size: 48,
            wavefront_sgpr_count: 16,
            workitem_vgpr_count: 32,
            ..Default::default()
        };
        let raw = desc.to_bytes();
        assert_eq!(&raw[84..86], &16u16.to_le_bytes());
        assert_eq!(&raw[86..88], &32u16.to_le_bytes());
        assert_eq!(KernelCodeDescriptor::from_bytes(&raw).unwrap(), desc);
    }

    #[test]
    fn test_short_descriptor_rejected() {
        assert!(KernelCodeDescriptor::from_bytes(&[0u8; 100]).is_err());
    }
}

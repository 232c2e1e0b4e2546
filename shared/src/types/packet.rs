//! Kernel dispatch packet
//!
//! Decodes the 64-byte AQL kernel dispatch packet the runtime writes into a
//! queue to launch one kernel invocation. All fields are little endian.

use super::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of a kernel dispatch packet in bytes
pub const DISPATCH_PACKET_SIZE: usize = 64;

/// Number of low bits of `setup` holding the dispatch dimensionality
pub const SETUP_DIMENSIONS_WIDTH: u16 = 2;

/// Packet type stored in the low byte of `header` for kernel dispatches
pub const PACKET_TYPE_KERNEL_DISPATCH: u8 = 2;

/// Decoded kernel dispatch packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchPacket {
    pub header: u16,
    pub setup: u16,
    pub workgroup_size: [u16; 3],
    pub grid_size: [u32; 3],
    pub private_segment_size: u32,
    pub group_segment_size: u32,

    /// Handle of the compiled kernel (address of its code descriptor)
    pub kernel_object: u64,
    pub kernarg_address: u64,
    pub completion_signal: u64,
}

impl DispatchPacket {
    /// Decode a packet from its in-queue representation
    pub fn from_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < DISPATCH_PACKET_SIZE {
            return Err(DecodeError::Truncated {
                what: "dispatch packet",
                expected: DISPATCH_PACKET_SIZE,
                actual: raw.len(),
            });
        }

        let mut buf = &raw[..DISPATCH_PACKET_SIZE];
        let header = buf.get_u16_le();
        let setup = buf.get_u16_le();
        let workgroup_size = [buf.get_u16_le(), buf.get_u16_le(), buf.get_u16_le()];
        buf.advance(2); // reserved0
        let grid_size = [buf.get_u32_le(), buf.get_u32_le(), buf.get_u32_le()];
        let private_segment_size = buf.get_u32_le();
        let group_segment_size = buf.get_u32_le();
        let kernel_object = buf.get_u64_le();
        let kernarg_address = buf.get_u64_le();
        buf.advance(8); // reserved2
        let completion_signal = buf.get_u64_le();

        Ok(Self {
            header,
            setup,
            workgroup_size,
            grid_size,
            private_segment_size,
            group_segment_size,
            kernel_object,
            kernarg_address,
            completion_signal,
        })
    }

    /// Encode the packet into its in-queue representation
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DISPATCH_PACKET_SIZE);
        buf.put_u16_le(self.header);
        buf.put_u16_le(self.setup);
        for size in self.workgroup_size {
            buf.put_u16_le(size);
        }
        buf.put_u16_le(0);
        for size in self.grid_size {
            buf.put_u32_le(size);
        }
        buf.put_u32_le(self.private_segment_size);
        buf.put_u32_le(self.group_segment_size);
        buf.put_u64_le(self.kernel_object);
        buf.put_u64_le(self.kernarg_address);
        buf.put_u64_le(0);
        buf.put_u64_le(self.completion_signal);
        buf.freeze()
    }

    /// Packet type from the header's low byte
    pub fn packet_type(&self) -> u8 {
        (self.header & 0xff) as u8
    }

    /// Number of work dimensions (1-3) encoded in `setup`
    pub fn work_dim(&self) -> u32 {
        u32::from(self.setup & ((1 << SETUP_DIMENSIONS_WIDTH) - 1))
    }

    /// Work-group size per dimension, widened
    pub fn work_group_size(&self) -> [u32; 3] {
        self.workgroup_size.map(u32::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> DispatchPacket {
        DispatchPacket {
            header: u16::from(PACKET_TYPE_KERNEL_DISPATCH),
            setup: 2,
            workgroup_size: [64, 4, 1],
            grid_size: [4096, 256, 1],
            private_segment_size: 0,
            group_segment_size: 2048,
            kernel_object: 0x7f00_1000_2000,
            kernarg_address: 0x7f00_3000_0000,
            completion_signal: 0xdead_beef,
        }
    }

    #[test]
    fn test_decode_field_offsets() {
        let mut raw = [0u8; DISPATCH_PACKET_SIZE];
        raw[2] = 3; // setup
        raw[4] = 0x40; // workgroup_size_x = 64
        raw[12..16].copy_from_slice(&1024u32.to_le_bytes());
        raw[32..40].copy_from_slice(&0x1234_5678u64.to_le_bytes());

        let packet = DispatchPacket::from_bytes(&raw).unwrap();
        assert_eq!(packet.work_dim(), 3);
        assert_eq!(packet.workgroup_size, [64, 0, 0]);
        assert_eq!(packet.grid_size, [1024, 0, 0]);
        assert_eq!(packet.kernel_object, 0x1234_5678);
    }

    #[test]
    fn test_encoded_packet_decodes_back() {
        let packet = sample_packet();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), DISPATCH_PACKET_SIZE);
        assert_eq!(DispatchPacket::from_bytes(&bytes).unwrap(), packet);
        assert_eq!(packet.packet_type(), PACKET_TYPE_KERNEL_DISPATCH);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let err = DispatchPacket::from_bytes(&[0u8; 40]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                what: "dispatch packet",
                expected: DISPATCH_PACKET_SIZE,
                actual: 40
            }
        );
    }

    #[test]
    fn test_work_dim_ignores_high_setup_bits() {
        let packet = DispatchPacket {
            setup: 0xfff1,
            ..Default::default()
        };
        assert_eq!(packet.work_dim(), 1);
    }
}

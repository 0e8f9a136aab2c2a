use crate::protocol::{Decoder, DecodeError, Encoder};

const ID_BITS: u32 = 10;
const ID_MASK: u32 = (1 << ID_BITS) - 1;
const SUB_CLIENT_MASK: u32 = 0b11;
const SENDER_SHIFT: u32 = 10;
const TARGET_SHIFT: u32 = 12;

/// The varint header in front of every packet in a batch.
///
/// Layout: packet id in the low 10 bits, then the sender and
/// target sub-client ids in two bits each.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct PacketHeader {
    pub packet_id: u32,
    pub sender_sub_client: u8,
    pub target_sub_client: u8,
}

impl PacketHeader {
    /// Header for a packet addressed between the main clients.
    pub fn new(packet_id: u32) -> Self {
        Self {
            packet_id,
            ..Default::default()
        }
    }

    pub fn to_raw(self) -> u32 {
        (self.packet_id & ID_MASK)
            | (u32::from(self.sender_sub_client) & SUB_CLIENT_MASK) << SENDER_SHIFT
            | (u32::from(self.target_sub_client) & SUB_CLIENT_MASK) << TARGET_SHIFT
    }

    pub fn from_raw(raw: u32) -> Self {
        Self {
            packet_id: raw & ID_MASK,
            sender_sub_client: ((raw >> SENDER_SHIFT) & SUB_CLIENT_MASK) as u8,
            target_sub_client: ((raw >> TARGET_SHIFT) & SUB_CLIENT_MASK) as u8,
        }
    }

    pub fn encode(self, encoder: &mut Encoder) {
        encoder.write_var_uint(self.to_raw());
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        decoder.read_var_uint().map(Self::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_layout() {
        let header = PacketHeader {
            packet_id: 0x3a,
            sender_sub_client: 1,
            target_sub_client: 2,
        };
        assert_eq!(header.to_raw(), 0x3a | 1 << 10 | 2 << 12);
    }

    proptest! {
        #[test]
        fn packs_and_unpacks(packet_id in 0u32..1024, sender in 0u8..4, target in 0u8..4) {
            let header = PacketHeader { packet_id, sender_sub_client: sender, target_sub_client: target };
            let mut buf = Vec::new();
            header.encode(&mut Encoder::new(&mut buf));
            let decoded = PacketHeader::decode(&mut Decoder::new(&buf)).unwrap();
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn high_bits_are_ignored(raw: u32) {
            let header = PacketHeader::from_raw(raw);
            prop_assert_eq!(header.to_raw(), raw & 0x3fff);
        }
    }
}

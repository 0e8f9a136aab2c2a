//! Compound field types shared between packets.

use crate::{
    position::{Vec3, Vec3i},
    protocol::{nbt, Decode, DecodeError, Decoder, Encode, Encoder},
};
use bedrock_transfer_proxy_macros::{Decode, Encode};

/// An item stack as sent in inventories and equipment packets.
///
/// Air (`id == 0`) is a single varint with nothing after it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemStack {
    pub id: i32,
    pub count: u16,
    pub damage: u32,
    pub net_id: Option<i32>,
    pub block_runtime_id: i32,
    /// NBT, can-place-on and can-destroy lists. Carried through as-is.
    pub extra: Vec<u8>,
}

impl ItemStack {
    pub fn is_air(&self) -> bool {
        self.id == 0
    }
}

impl Encode for ItemStack {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.id);
        if self.is_air() {
            return;
        }
        encoder.write_u16(self.count);
        encoder.write_var_uint(self.damage);
        encoder.write_bool(self.net_id.is_some());
        if let Some(net_id) = self.net_id {
            encoder.write_var_int(net_id);
        }
        encoder.write_var_int(self.block_runtime_id);
        encoder.write_byte_array(&self.extra);
    }
}

impl Decode for ItemStack {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let id = decoder.read_var_int()?;
        if id == 0 {
            return Ok(Self::default());
        }
        let count = decoder.read_u16()?;
        let damage = decoder.read_var_uint()?;
        let net_id = if decoder.read_bool()? {
            Some(decoder.read_var_int()?)
        } else {
            None
        };
        let block_runtime_id = decoder.read_var_int()?;
        let extra = decoder.read_byte_array()?.to_vec();
        Ok(Self {
            id,
            count,
            damage,
            net_id,
            block_runtime_id,
            extra,
        })
    }
}

/// A raw network NBT tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NbtBlob(pub Vec<u8>);

impl Encode for NbtBlob {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_slice(&self.0);
    }
}

impl Decode for NbtBlob {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        nbt::read_raw(decoder).map(|raw| Self(raw.to_vec()))
    }
}

/// Metadata keys the proxy reads or writes.
pub mod metadata_key {
    pub const FLAGS: u32 = 0;
    /// Block runtime id of a falling block.
    pub const VARIANT: u32 = 2;
}

/// Entity flag bits stored under [`metadata_key::FLAGS`].
pub mod entity_flag {
    pub const IMMOBILE: u32 = 16;
    pub const BREATHING: u32 = 35;
    pub const HAS_GRAVITY: u32 = 46;
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
#[encoding(discriminant = "varuint")]
pub enum MetadataValue {
    #[encoding(id = 0)]
    Byte(u8),
    #[encoding(id = 1)]
    Short(i16),
    #[encoding(id = 2)]
    Int(#[encoding(varint)] i32),
    #[encoding(id = 3)]
    Float(f32),
    #[encoding(id = 4)]
    String(String),
    #[encoding(id = 5)]
    Nbt(NbtBlob),
    #[encoding(id = 6)]
    BlockPos(Vec3i),
    #[encoding(id = 7)]
    Long(#[encoding(varlong)] i64),
    #[encoding(id = 8)]
    Vec3(Vec3),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MetadataEntry {
    #[encoding(varuint)]
    pub key: u32,
    pub value: MetadataValue,
}

/// An entity's metadata dictionary.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct EntityMetadata {
    #[encoding(length_prefix = "varuint")]
    pub entries: Vec<MetadataEntry>,
}

impl EntityMetadata {
    pub fn get(&self, key: u32) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: u32) -> Option<&mut MetadataValue> {
        self.entries
            .iter_mut()
            .find(|entry| entry.key == key)
            .map(|entry| &mut entry.value)
    }

    pub fn insert(&mut self, key: u32, value: MetadataValue) {
        match self.get_mut(key) {
            Some(existing) => *existing = value,
            None => self.entries.push(MetadataEntry { key, value }),
        }
    }

    /// Metadata holding only the given entity flags.
    pub fn with_flags(flags: &[u32]) -> Self {
        let bits = flags.iter().fold(0i64, |bits, flag| bits | 1 << flag);
        let mut metadata = Self::default();
        metadata.insert(metadata_key::FLAGS, MetadataValue::Long(bits));
        metadata
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct IntProperty {
    #[encoding(varuint)]
    pub index: u32,
    #[encoding(varint)]
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FloatProperty {
    #[encoding(varuint)]
    pub index: u32,
    pub value: f32,
}

/// Synced entity properties.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct EntityProperties {
    #[encoding(length_prefix = "varuint")]
    pub ints: Vec<IntProperty>,
    #[encoding(length_prefix = "varuint")]
    pub floats: Vec<FloatProperty>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct EntityAttribute {
    pub name: String,
    pub min: f32,
    pub value: f32,
    pub max: f32,
}

/// Container addressing introduced with dynamic containers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct FullContainerName {
    pub container_id: u8,
    #[encoding(bool_prefixed)]
    pub dynamic_id: Option<u32>,
}

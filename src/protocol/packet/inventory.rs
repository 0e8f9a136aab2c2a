use crate::protocol::{
    types::{FullContainerName, ItemStack},
    Decode, DecodeError, Decoder, Encode, Encoder,
};
use bedrock_transfer_proxy_macros::{Decode, Encode};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MobEquipment {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub item: ItemStack,
    pub inventory_slot: u8,
    pub hotbar_slot: u8,
    pub window_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct InventoryContent {
    #[encoding(varuint)]
    pub window_id: u32,
    #[encoding(length_prefix = "varuint")]
    pub items: Vec<ItemStack>,
    /// Container name and size on newer versions.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySlot {
    pub window_id: u32,
    pub slot: u32,
    pub container_name: Option<FullContainerName>,
    pub dynamic_container_size: u32,
    pub item: ItemStack,
}

impl Encode for InventorySlot {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_uint(self.window_id);
        encoder.write_var_uint(self.slot);
        if encoder.version().has_full_container_name() {
            self.container_name
                .clone()
                .unwrap_or_default()
                .encode(encoder);
            encoder.write_var_uint(self.dynamic_container_size);
        }
        self.item.encode(encoder);
    }
}

impl Decode for InventorySlot {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let window_id = decoder.read_var_uint()?;
        let slot = decoder.read_var_uint()?;
        let (container_name, dynamic_container_size) =
            if decoder.version().has_full_container_name() {
                (
                    Some(FullContainerName::decode(decoder)?),
                    decoder.read_var_uint()?,
                )
            } else {
                (None, 0)
            };
        let item = ItemStack::decode(decoder)?;
        Ok(Self {
            window_id,
            slot,
            container_name,
            dynamic_container_size,
            item,
        })
    }
}

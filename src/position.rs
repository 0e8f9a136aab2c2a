use crate::protocol::{Decode, DecodeError, Decoder, Encode, Encoder};
use serde::{Deserialize, Serialize};

/// Position of a block. On the wire the y coordinate is unsigned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub fn chunk(self) -> ChunkPosition {
        ChunkPosition {
            x: self.x.div_euclid(16),
            z: self.z.div_euclid(16),
        }
    }
}

impl From<Vec3> for BlockPosition {
    fn from(value: Vec3) -> Self {
        Self {
            x: value.x.floor() as i32,
            y: value.y.floor() as i32,
            z: value.z.floor() as i32,
        }
    }
}

impl Encode for BlockPosition {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.x);
        encoder.write_var_uint(self.y as u32);
        encoder.write_var_int(self.z);
    }
}

impl Decode for BlockPosition {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            x: decoder.read_var_int()?,
            y: decoder.read_var_uint()? as i32,
            z: decoder.read_var_int()?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub x: i32,
    pub z: i32,
}

/// Signed block vector, every component a zigzag varint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vec3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Encode for Vec3i {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.x);
        encoder.write_var_int(self.y);
        encoder.write_var_int(self.z);
    }
}

impl Decode for Vec3i {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            x: decoder.read_var_int()?,
            y: decoder.read_var_int()?,
            z: decoder.read_var_int()?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Encode for Vec3 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_f32(self.x);
        encoder.write_f32(self.y);
        encoder.write_f32(self.z);
    }
}

impl Decode for Vec3 {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            x: decoder.read_f32()?,
            y: decoder.read_f32()?,
            z: decoder.read_f32()?,
        })
    }
}

/// Pitch and yaw, in degrees.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
}

impl Encode for Rotation {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_f32(self.pitch);
        encoder.write_f32(self.yaw);
    }
}

impl Decode for Rotation {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            pitch: decoder.read_f32()?,
            yaw: decoder.read_f32()?,
        })
    }
}

use crate::protocol::ProtocolVersion;

/// A raw encoder for a Bedrock bitstream.
///
/// Fixed-width integers are little-endian unless the method
/// name says otherwise.
#[derive(Debug)]
pub struct Encoder<'a> {
    buffer: &'a mut Vec<u8>,
    version: ProtocolVersion,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder that will append to the provided
    /// byte buffer, using the latest supported protocol layout.
    ///
    /// Any existing contents of `buffer` are left untouched.
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self::with_version(buffer, ProtocolVersion::LATEST)
    }

    /// Creates an encoder that writes the layouts of `version`.
    pub fn with_version(buffer: &'a mut Vec<u8>, version: ProtocolVersion) -> Self {
        Self { buffer, version }
    }

    /// Gets the protocol version whose layouts are written.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Number of bytes in the underlying buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn write_u8(&mut self, x: u8) {
        self.buffer.push(x);
    }

    pub fn write_i8(&mut self, x: i8) {
        self.write_u8(bytemuck::cast(x));
    }

    pub fn write_u16(&mut self, x: u16) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i16(&mut self, x: i16) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_u32(&mut self, x: u32) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i32(&mut self, x: i32) {
        self.buffer.extend(x.to_le_bytes());
    }

    /// Writes a big-endian signed int. Used by the handful of
    /// login-phase packets that predate the little-endian layout.
    pub fn write_i32_be(&mut self, x: i32) {
        self.buffer.extend(x.to_be_bytes());
    }

    pub fn write_u64(&mut self, x: u64) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_i64(&mut self, x: i64) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_f32(&mut self, x: f32) {
        self.buffer.extend(x.to_le_bytes());
    }

    pub fn write_bool(&mut self, x: bool) {
        self.write_u8(if x { 0x01 } else { 0x00 });
    }

    /// Writes a series of bytes to the stream. Does not write
    /// any sort of length prefix.
    pub fn write_slice(&mut self, slice: &[u8]) {
        self.buffer.extend_from_slice(slice);
    }

    /// Writes an unsigned 32-bit varint. Returns the number of bytes written.
    pub fn write_var_uint(&mut self, x: u32) -> usize {
        self.write_var_ulong(u64::from(x))
    }

    /// Writes an unsigned 64-bit varint. Returns the number of bytes written.
    pub fn write_var_ulong(&mut self, mut x: u64) -> usize {
        let mut bytes_written = 0;
        loop {
            let mut temp = (x & 0b0111_1111) as u8;
            x >>= 7;
            if x != 0 {
                temp |= 0b1000_0000;
            }

            self.buffer.push(temp);
            bytes_written += 1;

            if x == 0 {
                break bytes_written;
            }
        }
    }

    /// Writes a zigzag-encoded signed 32-bit varint.
    pub fn write_var_int(&mut self, x: i32) -> usize {
        self.write_var_uint(((x << 1) ^ (x >> 31)) as u32)
    }

    /// Writes a zigzag-encoded signed 64-bit varint.
    pub fn write_var_long(&mut self, x: i64) -> usize {
        self.write_var_ulong(((x << 1) ^ (x >> 63)) as u64)
    }

    /// Writes a byte array prefixed with its unsigned varint length.
    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_var_uint(bytes.len().try_into().unwrap_or(u32::MAX));
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a varuint-prefixed string to the stream.
    pub fn write_string(&mut self, x: &str) {
        self.write_byte_array(x.as_bytes());
    }
}

/// Number of bytes `x` occupies as an unsigned varint.
pub fn var_uint_size(x: u32) -> usize {
    Encoder::new(&mut Vec::with_capacity(5)).write_var_uint(x)
}

/// A type that can be written to an [`Encoder`].
pub trait Encode {
    fn encode(&self, encoder: &mut Encoder);
}

impl Encode for u8 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(*self);
    }
}

impl Encode for i8 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i8(*self);
    }
}

impl Encode for u16 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u16(*self);
    }
}

impl Encode for i16 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i16(*self);
    }
}

impl Encode for u32 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u32(*self);
    }
}

impl Encode for i32 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32(*self);
    }
}

impl Encode for u64 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u64(*self);
    }
}

impl Encode for i64 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i64(*self);
    }
}

impl Encode for f32 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_f32(*self);
    }
}

impl Encode for bool {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_bool(*self);
    }
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(self);
    }
}

/// UUIDs are two little-endian longs, most significant half first.
impl Encode for u128 {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u64((*self >> 64) as u64);
        encoder.write_u64(*self as u64);
    }
}

impl Encode for () {
    fn encode(&self, _encoder: &mut Encoder) {}
}

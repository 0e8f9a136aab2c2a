use crate::protocol::{ProtocolVersion, BUFFER_LIMIT};
use std::{convert::Infallible, num::TryFromIntError, str::Utf8Error};

/// An error while decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need {0} more bytes, but only {1} remain")]
    EndOfStream(usize, usize),
    #[error("invalid boolean pattern {0} - expected either 0 or 1")]
    InvalidBool(u8),
    #[error("varint / varlong is too long")]
    VarIntTooLong,
    #[error("byte array of length {0} exceeds the maximum allowed")]
    ArrayTooLong(usize),
    #[error("{0} unread bytes after the packet body")]
    TrailingBytes(usize),
    #[error("no packet is registered with id {0:#x}")]
    UnknownPacket(u32),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
    /// Special variant for derive macro integer conversions to work.
    /// Cannot occur.
    #[error(transparent)]
    Infallible(#[from] Infallible),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// A raw decoder for a Bedrock bitstream.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
    version: ProtocolVersion,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder for the latest supported protocol layout.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_version(buffer, ProtocolVersion::LATEST)
    }

    /// Creates a decoder that reads the layouts of `version`.
    pub fn with_version(buffer: &'a [u8], version: ProtocolVersion) -> Self {
        Self { buffer, version }
    }

    /// Creates a new decoder at the same position.
    pub fn duplicate(&self) -> Self {
        Self {
            buffer: self.buffer,
            version: self.version,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Gets the remaining buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.buffer.len()))
        }
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::EndOfStream(n, self.buffer.len()))
        }
    }

    /// Consumes every remaining byte.
    pub fn consume_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buffer)
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let data = self.consume_slice(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(data);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.consume().map(i8::from_le_bytes)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.consume().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.consume().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.consume().map(i32::from_le_bytes)
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        self.consume().map(i32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.consume().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.consume().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.consume().map(f32::from_le_bytes)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let x = self.read_u8()?;
        match x {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidBool(x)),
        }
    }

    /// Reads an unsigned 32-bit varint.
    pub fn read_var_uint(&mut self) -> Result<u32> {
        self.read_var_uint_with_size().map(|(x, _)| x)
    }

    /// Reads an unsigned 32-bit varint, additionally
    /// returning the number of bytes read.
    pub fn read_var_uint_with_size(&mut self) -> Result<(u32, usize)> {
        let (value, size) = self.read_varint_bits(5)?;
        Ok((value as u32, size))
    }

    /// Reads an unsigned 64-bit varint.
    pub fn read_var_ulong(&mut self) -> Result<u64> {
        self.read_varint_bits(10).map(|(x, _)| x)
    }

    /// Reads a zigzag-encoded signed 32-bit varint.
    pub fn read_var_int(&mut self) -> Result<i32> {
        let raw = self.read_var_uint()?;
        Ok((raw >> 1) as i32 ^ -((raw & 1) as i32))
    }

    /// Reads a zigzag-encoded signed 64-bit varint.
    pub fn read_var_long(&mut self) -> Result<i64> {
        let raw = self.read_var_ulong()?;
        Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
    }

    fn read_varint_bits(&mut self, max_bytes: u32) -> Result<(u64, usize)> {
        let mut num_read = 0;
        let mut result = 0u64;

        loop {
            let read = self.read_u8()?;
            let value = u64::from(read & 0b0111_1111);
            result |= value.overflowing_shl(7 * num_read).0;

            num_read += 1;

            if read & 0b1000_0000 == 0 {
                break;
            }
            if num_read >= max_bytes {
                return Err(DecodeError::VarIntTooLong);
            }
        }
        Ok((result, num_read as usize))
    }

    /// Reads a byte array prefixed with its unsigned varint length.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8]> {
        let length = usize::try_from(self.read_var_uint()?)?;
        if length > BUFFER_LIMIT {
            return Err(DecodeError::ArrayTooLong(length));
        }
        self.consume_slice(length)
    }

    /// Reads a string from the stream.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let bytes = self.read_byte_array()?;
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// A type that can be read from a [`Decoder`].
pub trait Decode: Sized {
    fn decode(decoder: &mut Decoder) -> Result<Self>;
}

impl Decode for u8 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u8()
    }
}

impl Decode for i8 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i8()
    }
}

impl Decode for u16 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u16()
    }
}

impl Decode for i16 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i16()
    }
}

impl Decode for u32 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u32()
    }
}

impl Decode for i32 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i32()
    }
}

impl Decode for u64 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_u64()
    }
}

impl Decode for i64 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_i64()
    }
}

impl Decode for f32 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_f32()
    }
}

impl Decode for bool {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_bool()
    }
}

impl Decode for String {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        decoder.read_string().map(str::to_owned)
    }
}

impl Decode for u128 {
    fn decode(decoder: &mut Decoder) -> Result<Self> {
        let high = decoder.read_u64()?;
        let low = decoder.read_u64()?;
        Ok((u128::from(high) << 64) | u128::from(low))
    }
}

impl Decode for () {
    fn decode(_decoder: &mut Decoder) -> Result<Self> {
        Ok(())
    }
}

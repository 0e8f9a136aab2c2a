//! Skipping over network (varint-flavoured, little-endian) NBT.
//!
//! The proxy never interprets NBT; it only needs to know where a
//! tag ends so it can carry the bytes through unchanged.

use crate::protocol::{DecodeError, Decoder};
use anyhow::anyhow;

const MAX_DEPTH: usize = 512;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

/// Reads one named root tag and returns its raw bytes.
pub fn read_raw<'a>(decoder: &mut Decoder<'a>) -> Result<&'a [u8], DecodeError> {
    let start = decoder.buffer();
    let tag = decoder.read_u8()?;
    if tag != TAG_END {
        decoder.read_string()?;
        skip_payload(decoder, tag, 0)?;
    }
    let consumed = start.len() - decoder.buffer().len();
    Ok(&start[..consumed])
}

fn read_length(decoder: &mut Decoder) -> Result<usize, DecodeError> {
    let length = decoder.read_var_int()?;
    usize::try_from(length).map_err(|_| anyhow!("negative NBT length {length}").into())
}

fn skip_payload(decoder: &mut Decoder, tag: u8, depth: usize) -> Result<(), DecodeError> {
    if depth > MAX_DEPTH {
        return Err(anyhow!("NBT nesting exceeds {MAX_DEPTH}").into());
    }
    match tag {
        TAG_BYTE => {
            decoder.consume_slice(1)?;
        }
        TAG_SHORT => {
            decoder.consume_slice(2)?;
        }
        TAG_INT => {
            decoder.read_var_int()?;
        }
        TAG_LONG => {
            decoder.read_var_long()?;
        }
        TAG_FLOAT => {
            decoder.consume_slice(4)?;
        }
        TAG_DOUBLE => {
            decoder.consume_slice(8)?;
        }
        TAG_BYTE_ARRAY => {
            let length = read_length(decoder)?;
            decoder.consume_slice(length)?;
        }
        TAG_STRING => {
            decoder.read_string()?;
        }
        TAG_LIST => {
            let element = decoder.read_u8()?;
            let length = read_length(decoder)?;
            for _ in 0..length {
                skip_payload(decoder, element, depth + 1)?;
            }
        }
        TAG_COMPOUND => loop {
            let child = decoder.read_u8()?;
            if child == TAG_END {
                break;
            }
            decoder.read_string()?;
            skip_payload(decoder, child, depth + 1)?;
        },
        TAG_INT_ARRAY => {
            for _ in 0..read_length(decoder)? {
                decoder.read_var_int()?;
            }
        }
        TAG_LONG_ARRAY => {
            for _ in 0..read_length(decoder)? {
                decoder.read_var_long()?;
            }
        }
        other => return Err(anyhow!("unknown NBT tag type {other}").into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Encoder;

    #[test]
    fn skips_nested_compound() {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_u8(TAG_COMPOUND);
        encoder.write_string("");
        encoder.write_u8(TAG_LIST);
        encoder.write_string("values");
        encoder.write_u8(TAG_INT);
        encoder.write_var_int(2);
        encoder.write_var_int(-7);
        encoder.write_var_int(300);
        encoder.write_u8(TAG_STRING);
        encoder.write_string("name");
        encoder.write_string("minecraft:stone");
        encoder.write_u8(TAG_END);
        let tag_len = buf.len();
        buf.push(0xAB);

        let mut decoder = Decoder::new(&buf);
        let raw = read_raw(&mut decoder).unwrap();
        assert_eq!(raw.len(), tag_len);
        assert_eq!(decoder.buffer(), [0xAB]);
    }

    #[test]
    fn rejects_unknown_tag() {
        let data = [TAG_COMPOUND, 0, 42, 0];
        assert!(read_raw(&mut Decoder::new(&data)).is_err());
    }
}

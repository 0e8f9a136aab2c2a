//! Rewriting block runtime ids inside serialized sub-chunks.
//!
//! A sub-chunk starts with a version byte. Versions 1, 8 and 9 hold
//! one or more block storages, each made of a flags byte
//! (`bits_per_block << 1 | runtime`), the packed index words and a
//! palette of block ids. Only the palette is touched: every other
//! byte is copied through unchanged.

use crate::{
    palette::BlockRewrite,
    protocol::{nbt, DecodeError, Decoder, Encoder},
};

const BLOCKS_PER_STORAGE: u32 = 4096;
const VALID_BITS_PER_BLOCK: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 8, 16];

/// Why a chunk was left without rewriting.
#[derive(Debug, thiserror::Error)]
pub enum ChunkFormatError {
    #[error("unknown sub-chunk version {0}")]
    UnknownVersion(u8),
    #[error("invalid bits per block {0}")]
    InvalidBitsPerBlock(u8),
    #[error("negative palette size {0}")]
    NegativePaletteSize(i32),
    #[error("truncated sub-chunk: {0}")]
    Truncated(#[from] DecodeError),
}

/// Number of `u32` words holding the packed indices.
fn word_count(bits_per_block: u8) -> usize {
    if bits_per_block == 0 {
        return 0;
    }
    let blocks_per_word = 32 / u32::from(bits_per_block);
    BLOCKS_PER_STORAGE.div_ceil(blocks_per_word) as usize
}

/// Rewrites the block palettes of the first `sub_chunk_count`
/// sub-chunks in `data`.
///
/// Returns `None` when no id changed, so the caller can keep the
/// original bytes.
pub fn rewrite_chunk_data(
    data: &[u8],
    sub_chunk_count: u32,
    rewrite: &BlockRewrite,
) -> Result<Option<Vec<u8>>, ChunkFormatError> {
    if rewrite.is_identity() || sub_chunk_count == 0 {
        return Ok(None);
    }

    let mut writer = ChunkWriter {
        decoder: Decoder::new(data),
        out: Vec::with_capacity(data.len()),
        changed: false,
    };
    for _ in 0..sub_chunk_count {
        if !writer.sub_chunk(rewrite)? {
            break;
        }
    }
    // biomes, border blocks and block entities
    writer.copy_rest();

    Ok(writer.changed.then_some(writer.out))
}

/// Rewrites a single serialized sub-chunk, as sent in sub-chunk
/// responses.
pub fn rewrite_sub_chunk(
    data: &[u8],
    rewrite: &BlockRewrite,
) -> Result<Option<Vec<u8>>, ChunkFormatError> {
    rewrite_chunk_data(data, 1, rewrite)
}

struct ChunkWriter<'a> {
    decoder: Decoder<'a>,
    out: Vec<u8>,
    changed: bool,
}

impl<'a> ChunkWriter<'a> {
    fn copy(&mut self, n: usize) -> Result<(), DecodeError> {
        let bytes = self.decoder.consume_slice(n)?;
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    fn copy_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self.decoder.read_u8()?;
        self.out.push(byte);
        Ok(byte)
    }

    fn copy_rest(&mut self) {
        let rest = self.decoder.consume_rest();
        self.out.extend_from_slice(rest);
    }

    /// Returns false once the remaining data cannot be walked.
    fn sub_chunk(&mut self, rewrite: &BlockRewrite) -> Result<bool, ChunkFormatError> {
        let version = self.copy_u8()?;
        let storages = match version {
            1 => 1,
            8 => self.copy_u8()?,
            9 => {
                let storages = self.copy_u8()?;
                // y index
                self.copy_u8()?;
                storages
            }
            // legacy formats store block ids directly
            0 | 2..=7 => return Ok(false),
            other => return Err(ChunkFormatError::UnknownVersion(other)),
        };

        for _ in 0..storages {
            self.storage(rewrite)?;
        }
        Ok(true)
    }

    fn storage(&mut self, rewrite: &BlockRewrite) -> Result<(), ChunkFormatError> {
        let flags = self.copy_u8()?;
        let bits_per_block = flags >> 1;
        let runtime = flags & 1 == 1;
        if !VALID_BITS_PER_BLOCK.contains(&bits_per_block) {
            return Err(ChunkFormatError::InvalidBitsPerBlock(bits_per_block));
        }
        self.copy(word_count(bits_per_block) * 4)?;

        let palette_size = if bits_per_block == 0 {
            1
        } else {
            let size = self.decoder.read_var_int()?;
            Encoder::new(&mut self.out).write_var_int(size);
            u32::try_from(size).map_err(|_| ChunkFormatError::NegativePaletteSize(size))?
        };

        for _ in 0..palette_size {
            if runtime {
                let id = self.decoder.read_var_int()?;
                let translated = rewrite.from_downstream(id as u32) as i32;
                self.changed |= translated != id;
                Encoder::new(&mut self.out).write_var_int(translated);
            } else {
                // persistent storages name their blocks in NBT
                let entry = nbt::read_raw(&mut self.decoder)?;
                self.out.extend_from_slice(entry);
            }
        }
        Ok(())
    }
}

//! Pluggable per-frame compression, negotiated via the `COMPRESS` feature.
//!
//! Frames here are fully buffered before compression — unlike a streamed
//! transport codec, there's no reason to reach for an async-stream
//! compression crate; each compressed envelope round-trips through a
//! one-shot `compress`/`decompress` call, which is exactly what `flate2`'s
//! synchronous `Vec<u8>` API gives us.

use std::io::Write;

use crate::error::CodecError;

/// A symmetric frame compressor. Implementations are looked up by the
/// opaque identifier negotiated in the `COMPRESS` feature's value.
pub trait Compressor: Send + Sync + 'static {
    fn compress(&self, data: &[u8]) -> Vec<u8>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// The identifier advertised and negotiated on the wire.
    fn name(&self) -> &'static str;
}

/// The no-op compressor, used when `COMPRESS` is not negotiated but a
/// uniform `Option<Arc<dyn Compressor>>` call site is still convenient.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// DEFLATE via `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: flate2::Compression,
}

impl DeflateCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level),
        }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new(flate2::Compression::default().level())
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), self.level);
        // Writing to an in-memory Vec<u8> never fails.
        encoder.write_all(data).expect("in-memory write");
        encoder.finish().expect("in-memory finish")
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = flate2::write::DeflateDecoder::new(Vec::new());
        decoder
            .write_all(data)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        decoder
            .finish()
            .map_err(|e| CodecError::Decompress(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "deflate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let c = IdentityCompressor;
        let data = b"hello world";
        assert_eq!(c.decompress(&c.compress(data)).unwrap(), data);
    }

    #[test]
    fn deflate_round_trips() {
        let c = DeflateCompressor::default();
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, to give deflate something to chew on ".repeat(8);
        let compressed = c.compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(c.decompress(&compressed).unwrap(), data);
    }
}

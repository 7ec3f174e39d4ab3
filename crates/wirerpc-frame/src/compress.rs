//! Payload compression seam.
//!
//! The protocol only carries a [`CompressType`] selector; the codecs
//! themselves are supplied by the application. [`CompressType::None`] is
//! always available and never copies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::message::CompressType;

/// A payload compression codec.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Registry of codecs keyed by compression type.
#[derive(Clone, Default)]
pub struct Compressors {
    codecs: HashMap<CompressType, Arc<dyn Compressor>>,
}

impl Compressors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the codec for `compress_type`.
    pub fn with(mut self, compress_type: CompressType, codec: Arc<dyn Compressor>) -> Self {
        self.register(compress_type, codec);
        self
    }

    pub fn register(&mut self, compress_type: CompressType, codec: Arc<dyn Compressor>) {
        self.codecs.insert(compress_type, codec);
    }

    pub fn supports(&self, compress_type: CompressType) -> bool {
        compress_type == CompressType::None || self.codecs.contains_key(&compress_type)
    }

    pub fn compress(&self, compress_type: CompressType, data: Bytes) -> Result<Bytes> {
        if compress_type == CompressType::None {
            return Ok(data);
        }
        let codec = self.codec(compress_type)?;
        codec
            .compress(&data)
            .map(Bytes::from)
            .map_err(FrameError::Compression)
    }

    pub fn decompress(&self, compress_type: CompressType, data: Bytes) -> Result<Bytes> {
        if compress_type == CompressType::None {
            return Ok(data);
        }
        let codec = self.codec(compress_type)?;
        codec
            .decompress(&data)
            .map(Bytes::from)
            .map_err(FrameError::Compression)
    }

    fn codec(&self, compress_type: CompressType) -> Result<&Arc<dyn Compressor>> {
        self.codecs
            .get(&compress_type)
            .ok_or(FrameError::UnsupportedCompression(compress_type))
    }
}

impl fmt::Debug for Compressors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.codecs.keys().collect();
        types.sort_by_key(|t| u8::from(**t));
        f.debug_struct("Compressors").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reverses bytes; enough to prove the codec is applied both ways.
    struct Reverse;

    impl Compressor for Reverse {
        fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }

        fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
            self.compress(data)
        }
    }

    #[test]
    fn none_is_passthrough() {
        let registry = Compressors::new();
        let data = Bytes::from_static(b"plain");
        assert!(registry.supports(CompressType::None));
        assert_eq!(
            registry.compress(CompressType::None, data.clone()).unwrap(),
            data
        );
    }

    #[test]
    fn unregistered_type_is_unsupported() {
        let registry = Compressors::new();
        assert!(!registry.supports(CompressType::Gzip));
        let err = registry
            .compress(CompressType::Gzip, Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnsupportedCompression(CompressType::Gzip)
        ));
    }

    #[test]
    fn registered_codec_applies_both_directions() {
        let registry = Compressors::new().with(CompressType::Gzip, Arc::new(Reverse));
        let packed = registry
            .compress(CompressType::Gzip, Bytes::from_static(b"abc"))
            .unwrap();
        assert_eq!(packed.as_ref(), b"cba");
        let unpacked = registry.decompress(CompressType::Gzip, packed).unwrap();
        assert_eq!(unpacked.as_ref(), b"abc");
    }
}

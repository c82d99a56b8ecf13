// src/compression/mod.rs
//! Compression layer for capsule archives
//!
//! Capsules are plain tar streams optionally wrapped in gzip or xz. The
//! wrapper is chosen from the filename suffix only; magic bytes are never
//! consulted.

use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::path::Path;

/// Supported archive compression wrappers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Uncompressed tar (.tar)
    None,
    /// Gzip (.gz, .tgz)
    Gzip,
    /// XZ/LZMA (.xz)
    Xz,
}

impl CompressionFormat {
    /// Detect the wrapper from a file name
    ///
    /// # Examples
    /// ```
    /// use scriptorium::compression::CompressionFormat;
    ///
    /// assert_eq!(CompressionFormat::from_name("kjv.tar.gz"), Some(CompressionFormat::Gzip));
    /// assert_eq!(CompressionFormat::from_name("kjv.capsule.tar.xz"), Some(CompressionFormat::Xz));
    /// assert_eq!(CompressionFormat::from_name("kjv.tar"), Some(CompressionFormat::None));
    /// assert_eq!(CompressionFormat::from_name("kjv.zip"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".gz") || lower.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if lower.ends_with(".xz") {
            Some(Self::Xz)
        } else if lower.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Detect the wrapper from a path, failing on anything that is not a capsule archive
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_name(&name).ok_or_else(|| Error::UnsupportedFormat(name))
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Wrap a reader in the matching decompressor
pub fn create_decoder<'a, R: Read + 'a>(reader: R, format: CompressionFormat) -> Box<dyn Read + 'a> {
    match format {
        CompressionFormat::None => Box::new(reader),
        CompressionFormat::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        CompressionFormat::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
    }
}

/// Compressing writer that must be explicitly finished
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    Xz(xz2::write::XzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W, format: CompressionFormat) -> Self {
        match format {
            CompressionFormat::None => Self::Plain(writer),
            CompressionFormat::Gzip => {
                Self::Gzip(flate2::write::GzEncoder::new(writer, flate2::Compression::default()))
            }
            CompressionFormat::Xz => Self::Xz(xz2::write::XzEncoder::new(writer, 6)),
        }
    }

    /// Flush the compression trailer and hand back the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Self::Gzip(e) => e.finish(),
            Self::Xz(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(e) => e.write(buf),
            Self::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(e) => e.flush(),
            Self::Xz(e) => e.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_name() {
        assert_eq!(CompressionFormat::from_name("a.tar.gz"), Some(CompressionFormat::Gzip));
        assert_eq!(CompressionFormat::from_name("a.TGZ"), Some(CompressionFormat::Gzip));
        assert_eq!(CompressionFormat::from_name("a.tar.xz"), Some(CompressionFormat::Xz));
        assert_eq!(CompressionFormat::from_name("a.tar"), Some(CompressionFormat::None));
        assert_eq!(CompressionFormat::from_name("a.tar.zst"), None);
        assert_eq!(CompressionFormat::from_name("notes.txt"), None);
    }

    #[test]
    fn test_from_path_unsupported() {
        let err = CompressionFormat::from_path(Path::new("/tmp/module.zip")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(name) if name == "module.zip"));
    }

    #[test]
    fn test_encode_decode_each_format() {
        for format in [CompressionFormat::None, CompressionFormat::Gzip, CompressionFormat::Xz] {
            let mut encoder = Encoder::new(Vec::new(), format);
            encoder.write_all(b"in the beginning").unwrap();
            let bytes = encoder.finish().unwrap();

            let mut decoded = String::new();
            create_decoder(bytes.as_slice(), format)
                .read_to_string(&mut decoded)
                .unwrap();
            assert_eq!(decoded, "in the beginning", "format {}", format);
        }
    }
}

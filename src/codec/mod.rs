//! Document compression codecs
//!
//! Archive members and fetched containers use one of three encodings. The
//! member filename suffix (`.gz`, `.zst`) is the source of truth when reading
//! an archive back.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

/// Default gzip level
pub const DEFAULT_GZIP_LEVEL: i32 = 6;

/// Default zstd level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compression algorithm applied to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Filename suffix added to compressed members
    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// Level used when none is configured
    pub fn default_level(&self) -> i32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => DEFAULT_GZIP_LEVEL,
            Compression::Zstd => DEFAULT_ZSTD_LEVEL,
        }
    }

    /// Accepted level range
    pub fn level_range(&self) -> (i32, i32) {
        match self {
            Compression::None => (0, 0),
            Compression::Gzip => (0, 9),
            Compression::Zstd => (1, 22),
        }
    }

    /// Detect the codec from a member filename suffix
    pub fn from_filename(name: &str) -> Self {
        if name.ends_with(".gz") {
            Compression::Gzip
        } else if name.ends_with(".zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Strip this codec's suffix from a filename, if present
    pub fn strip_suffix<'a>(&self, name: &'a str) -> &'a str {
        match self {
            Compression::None => name,
            _ => name.strip_suffix(self.suffix()).unwrap_or(name),
        }
    }

    /// Compress a buffer in memory
    pub fn compress(&self, data: &[u8], level: i32) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let level = level.clamp(0, 9) as u32;
                let mut encoder = GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::new(level),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Compression::Zstd => zstd::stream::encode_all(data, level),
        }
    }

    /// Stream-decompress `reader` into `writer`, returning bytes written
    pub fn decompress_to<R: Read, W: Write>(&self, reader: R, writer: &mut W) -> io::Result<u64> {
        match self {
            Compression::None => {
                let mut reader = reader;
                io::copy(&mut reader, writer)
            }
            Compression::Gzip => {
                let mut decoder = GzDecoder::new(reader);
                io::copy(&mut decoder, writer)
            }
            Compression::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)?;
                io::copy(&mut decoder, writer)
            }
        }
    }

    /// Decompress a buffer in memory
    pub fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        self.decompress_to(data, &mut out)?;
        Ok(out)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut data = b"<html><body>quarterly report</body></html>\n".repeat(500);
        data.extend((0u8..=255).cycle().take(4096));
        data
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = sample();
        let compressed = Compression::Gzip.compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_zstd_round_trip() {
        let data = sample();
        let compressed = Compression::Zstd.compress(&data, 3).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compression::Zstd.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_none_is_identity() {
        let data = sample();
        assert_eq!(Compression::None.compress(&data, 0).unwrap(), data);
        assert_eq!(Compression::None.decompress(&data).unwrap(), data);
    }

    #[test]
    fn test_empty_input_round_trips() {
        for codec in [Compression::Gzip, Compression::Zstd] {
            let compressed = codec.compress(&[], codec.default_level()).unwrap();
            assert!(codec.decompress(&compressed).unwrap().is_empty());
        }
    }

    #[test]
    fn test_truncated_zstd_fails() {
        let compressed = Compression::Zstd.compress(&sample(), 3).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(Compression::Zstd.decompress(truncated).is_err());
    }

    #[test]
    fn test_suffix_detection() {
        assert_eq!(Compression::from_filename("a.htm.gz"), Compression::Gzip);
        assert_eq!(Compression::from_filename("a.htm.zst"), Compression::Zstd);
        assert_eq!(Compression::from_filename("a.htm"), Compression::None);
        assert_eq!(Compression::Zstd.strip_suffix("a.htm.zst"), "a.htm");
        assert_eq!(Compression::Gzip.strip_suffix("a.htm"), "a.htm");
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("ZSTD".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!("lz4".parse::<Compression>().is_err());
        assert_eq!(serde_json::to_string(&Compression::Gzip).unwrap(), "\"gzip\"");
    }
}

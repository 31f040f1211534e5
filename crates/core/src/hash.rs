//! Content hashing using SHA-256

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Default read size for streaming hashes
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// A SHA-256 content hash, used both as an integrity check and a dedup key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash a reader to EOF in `chunk_size` pieces.
    ///
    /// Returns the hash and the number of bytes consumed.
    ///
    /// # Errors
    /// Returns an error if reading fails
    pub fn from_reader<R: Read>(reader: &mut R, chunk_size: usize) -> std::io::Result<(Self, u64)> {
        Self::copy_hashed(reader, &mut std::io::sink(), chunk_size)
    }

    /// Hash a file by path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Ok(Self::from_reader(&mut file, 64 * 1024)?.0)
    }

    /// Copy `reader` into `writer`, hashing every byte on the way through.
    ///
    /// # Errors
    /// Returns an error if reading or writing fails
    pub fn copy_hashed<R: Read, W: Write>(
        reader: &mut R,
        writer: &mut W,
        chunk_size: usize,
    ) -> std::io::Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
            writer.write_all(&buffer[..bytes_read])?;
            total += bytes_read as u64;
        }

        Ok((Self(hasher.finalize().into()), total))
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}

// Manifests store the full lowercase hex digest.
impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_content_hash_deterministic() {
        let data = b"hello world";
        let h1 = ContentHash::from_bytes(data);
        let h2 = ContentHash::from_bytes(data);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_content_hash_different_data() {
        let h1 = ContentHash::from_bytes(b"hello");
        let h2 = ContentHash::from_bytes(b"world");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_known_sha256_digest() {
        let h = ContentHash::from_bytes(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        // Larger than one chunk and not a multiple of it
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (streamed, len) =
            ContentHash::from_reader(&mut Cursor::new(&data), DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(streamed, ContentHash::from_bytes(&data));
        assert_eq!(len, 10_000);
    }

    #[test]
    fn test_copy_hashed_writes_everything() {
        let data = b"some mod bytes".repeat(1000);
        let mut out = Vec::new();
        let (hash, len) = ContentHash::copy_hashed(&mut Cursor::new(&data), &mut out, 7).unwrap();
        assert_eq!(out, data);
        assert_eq!(len, data.len() as u64);
        assert_eq!(hash, ContentHash::from_bytes(&data));
    }

    #[test]
    fn test_hex_serde() {
        let h = ContentHash::from_bytes(b"config");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
        assert!(serde_json::from_str::<ContentHash>("\"not-hex\"").is_err());
    }
}

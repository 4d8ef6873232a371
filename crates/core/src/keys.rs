//! Content addressing for cataloged assets.
//!
//! A [`PrimaryKey`] has a fixed binary layout so that byte order equals
//! chronological order:
//!
//! ```text
//! offset  size  field
//! 0       8     capture time, whole seconds since the epoch (i64, sign bit
//!               flipped, big endian)
//! 8       4     sub-second nanoseconds (u32, big endian)
//! 12      4     path length in bytes (u32, big endian)
//! 16      n     raw path bytes
//! ```
//!
//! A [`LookupKey`] is the first 128 bits of the SHA-256 of the primary key,
//! base64url encoded without padding.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const HEADER_LEN: usize = 16;
const LOOKUP_DIGEST_BYTES: usize = 16;

/// Encoded length of every lookup key.
pub const LOOKUP_KEY_LEN: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimaryKey(Vec<u8>);

impl PrimaryKey {
    pub fn derive(captured_at: DateTime<Utc>, path: &Path) -> Self {
        let path_bytes = path_to_bytes(path);
        let seconds = (captured_at.timestamp() as u64) ^ (1 << 63);
        let nanos = captured_at.timestamp_subsec_nanos();

        let mut buf = Vec::with_capacity(HEADER_LEN + path_bytes.len());
        buf.extend_from_slice(&seconds.to_be_bytes());
        buf.extend_from_slice(&nanos.to_be_bytes());
        buf.extend_from_slice(&(path_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&path_bytes);
        Self(buf)
    }

    /// Wrap stored bytes, validating the layout.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let key = Self(bytes);
        key.decode()?;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Split the key back into its capture time and path.
    pub fn decode(&self) -> Result<(DateTime<Utc>, PathBuf)> {
        let corrupt = |message: String| Error::CorruptRecord {
            bucket: "primary key".to_string(),
            message,
        };
        if self.0.len() < HEADER_LEN {
            return Err(corrupt(format!("key has only {} bytes", self.0.len())));
        }
        let mut seconds = [0u8; 8];
        let mut nanos = [0u8; 4];
        let mut len = [0u8; 4];
        seconds.copy_from_slice(&self.0[0..8]);
        nanos.copy_from_slice(&self.0[8..12]);
        len.copy_from_slice(&self.0[12..16]);
        let (seconds, nanos) = (u64::from_be_bytes(seconds), u32::from_be_bytes(nanos));
        let len = u32::from_be_bytes(len) as usize;
        if self.0.len() - HEADER_LEN != len {
            return Err(corrupt(format!(
                "path length prefix {len} does not match {} trailing bytes",
                self.0.len() - HEADER_LEN
            )));
        }
        let captured_at = DateTime::from_timestamp((seconds ^ (1 << 63)) as i64, nanos)
            .ok_or_else(|| corrupt("capture time out of range".to_string()))?;
        Ok((captured_at, path_from_bytes(&self.0[HEADER_LEN..])))
    }

    pub fn lookup_key(&self) -> LookupKey {
        LookupKey::derive(self)
    }
}

/// Short, URL-safe, fixed-length identifier for an asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LookupKey(String);

impl LookupKey {
    pub fn derive(primary: &PrimaryKey) -> Self {
        let digest = Sha256::digest(primary.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(&digest[..LOOKUP_DIGEST_BYTES]))
    }

    /// Validate an externally supplied key.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = raw.len() == LOOKUP_KEY_LEN
            && URL_SAFE_NO_PAD
                .decode(raw)
                .is_ok_and(|bytes| bytes.len() == LOOKUP_DIGEST_BYTES);
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidLookupKey(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub(crate) fn from_stored(bytes: &[u8]) -> Result<Self> {
        let raw = std::str::from_utf8(bytes).map_err(|e| Error::CorruptRecord {
            bucket: "lookup key".to_string(),
            message: e.to_string(),
        })?;
        Self::parse(raw)
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(unix)]
pub(crate) fn path_to_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
pub(crate) fn path_to_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
pub(crate) fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub(crate) fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use rand::distributions::Alphanumeric;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn random_path(rng: &mut impl Rng) -> PathBuf {
        let depth = rng.gen_range(1..4);
        let mut path = PathBuf::from("/photos");
        for _ in 0..depth {
            let len = rng.gen_range(1..12);
            let segment: String = (&mut *rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            path.push(segment);
        }
        path.set_extension("jpg");
        path
    }

    fn random_time(rng: &mut impl Rng) -> DateTime<Utc> {
        let secs = rng.gen_range(-2_000_000_000i64..4_000_000_000);
        let nanos = rng.gen_range(0..1_000_000_000u32);
        DateTime::from_timestamp(secs, nanos).unwrap()
    }

    #[test]
    fn test_primary_key_is_deterministic() {
        let t = at(2020, 1, 1, 10, 0);
        let a = PrimaryKey::derive(t, Path::new("/photos/a.jpg"));
        let b = PrimaryKey::derive(t, Path::new("/photos/a.jpg"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_primary_key_round_trips_through_decode() {
        let t = at(1999, 12, 31, 23, 59);
        let path = Path::new("/photos/with <#> odd|chars.jpg");
        let key = PrimaryKey::derive(t, path);
        let (decoded_t, decoded_path) = key.decode().unwrap();
        assert_eq!(decoded_t, t);
        assert_eq!(decoded_path, path);
    }

    #[test]
    fn test_primary_key_orders_by_time_then_path() {
        let early = PrimaryKey::derive(at(2019, 12, 31, 23, 0), Path::new("/z.jpg"));
        let late_a = PrimaryKey::derive(at(2020, 1, 1, 9, 0), Path::new("/a.jpg"));
        let late_b = PrimaryKey::derive(at(2020, 1, 1, 9, 0), Path::new("/b.jpg"));
        let epoch = PrimaryKey::derive(DateTime::UNIX_EPOCH, Path::new("/zz.jpg"));
        let before_epoch = PrimaryKey::derive(at(1960, 1, 1, 0, 0), Path::new("/zz.jpg"));

        assert!(before_epoch < epoch);
        assert!(epoch < early);
        assert!(early < late_a);
        assert!(late_a < late_b);
    }

    #[test]
    fn test_primary_key_is_injective_over_random_pairs() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut pairs = HashSet::new();
        let mut keys = HashSet::new();
        for _ in 0..5_000 {
            let t = random_time(&mut rng);
            let p = random_path(&mut rng);
            let key = PrimaryKey::derive(t, &p);
            assert_eq!(key.decode().unwrap(), (t, p.clone()));
            if pairs.insert((t, p)) {
                assert!(keys.insert(key), "distinct pair produced a duplicate key");
            }
        }
    }

    #[test]
    fn test_time_order_matches_key_order_for_random_samples() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..2_000 {
            let (t1, t2) = (random_time(&mut rng), random_time(&mut rng));
            let k1 = PrimaryKey::derive(t1, Path::new("/same.jpg"));
            let k2 = PrimaryKey::derive(t2, Path::new("/same.jpg"));
            assert_eq!(t1.cmp(&t2), k1.cmp(&k2));
        }
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(PrimaryKey::from_bytes(vec![1, 2, 3]).is_err());

        let mut bytes = PrimaryKey::derive(DateTime::UNIX_EPOCH, Path::new("/a.jpg")).into_bytes();
        bytes.push(b'x');
        assert!(PrimaryKey::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_lookup_key_is_stable_and_fixed_length() {
        let key = PrimaryKey::derive(at(2020, 1, 1, 10, 0), Path::new("/photos/a.jpg"));
        let a = key.lookup_key();
        let b = LookupKey::derive(&key);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), LOOKUP_KEY_LEN);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_lookup_keys_do_not_collide() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut primaries = HashSet::new();
        let mut lookups = HashSet::new();
        while primaries.len() < 10_000 {
            let key = PrimaryKey::derive(random_time(&mut rng), &random_path(&mut rng));
            if primaries.insert(key.clone()) {
                assert!(lookups.insert(key.lookup_key()));
            }
        }
        assert_eq!(lookups.len(), 10_000);
    }

    #[test]
    fn test_parse_validates_lookup_keys() {
        let key = PrimaryKey::derive(DateTime::UNIX_EPOCH, Path::new("/a.jpg")).lookup_key();
        assert_eq!(LookupKey::parse(key.as_str()).unwrap(), key);

        assert!(LookupKey::parse("").is_err());
        assert!(LookupKey::parse("short").is_err());
        assert!(LookupKey::parse("../../../../etc/passwd!").is_err());
        assert!(LookupKey::parse(&"+".repeat(LOOKUP_KEY_LEN)).is_err());
    }
}

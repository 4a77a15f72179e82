//! Content hashing shared by the Merkle tree, reports and blocks.

use std::io::{self, Read};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Previous-hash value recorded by the genesis block (64 zero characters).
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

const READ_CHUNK: usize = 8192;

/// Compute SHA-256 hash of data as lowercase hex.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Hash a byte stream without buffering it whole.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize a record to JSON with object keys sorted at every depth.
///
/// Goes through `serde_json::Value`, whose map type keeps keys ordered, so the
/// output does not depend on struct field order or map insertion order.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Hash of a record's canonical JSON form.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(hash_data(canonical_json(value)?.as_bytes()))
}

/// Whether `s` looks like a hex SHA-256 digest.
pub fn is_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        let hash1 = hash_data(data);
        let hash2 = hash_data(data);
        assert_eq!(hash1, hash2);

        // SHA-256 produces 64 hex characters
        assert_eq!(hash1.len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            hash_data(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_slice() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(data.as_slice()).unwrap();
        assert_eq!(streamed, hash_data(&data));
    }

    #[test]
    fn test_canonical_json_ignores_insertion_order() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        a.insert("mid", 3);

        let mut b = HashMap::new();
        b.insert("mid", 3);
        b.insert("alpha", 2);
        b.insert("zeta", 1);

        let ja = canonical_json(&a).unwrap();
        assert_eq!(ja, canonical_json(&b).unwrap());
        assert_eq!(ja, r#"{"alpha":2,"mid":3,"zeta":1}"#);
    }

    #[test]
    fn test_canonical_json_sorts_struct_fields() {
        #[derive(Serialize)]
        struct Unsorted {
            b: u8,
            a: u8,
        }
        assert_eq!(
            canonical_json(&Unsorted { b: 1, a: 2 }).unwrap(),
            r#"{"a":2,"b":1}"#
        );
    }

    #[test]
    fn test_genesis_sentinel() {
        assert!(is_digest(GENESIS_PREVIOUS_HASH));
        assert!(GENESIS_PREVIOUS_HASH.chars().all(|c| c == '0'));
        assert!(!is_digest("xyz"));
    }
}

//! Reports and the evidence files they carry.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash::{hash_canonical, hash_data, hash_reader};

/// Title recorded when the submitter leaves it blank.
pub const DEFAULT_TITLE: &str = "Untitled";
/// Uploader recorded when the submitter leaves it blank.
pub const DEFAULT_UPLOADER: &str = "anonymous";

/// Metadata keys every report carries, possibly empty.
pub const METADATA_DESCRIPTION: &str = "description";
pub const METADATA_LOCATION: &str = "location";
pub const METADATA_TIME: &str = "time";

/// A single evidence file accepted into a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceItem {
    /// Unique name the raw bytes are stored under
    pub stored_name: String,
    /// SHA-256 of the file contents
    pub digest: String,
    /// MIME type reported by the uploader
    pub media_type: String,
    /// File size in bytes
    pub size_bytes: u64,
}

impl EvidenceItem {
    /// Describe in-memory file contents.
    pub fn from_bytes(original_name: &str, media_type: &str, bytes: &[u8]) -> Self {
        Self {
            stored_name: unique_stored_name(original_name),
            digest: hash_data(bytes),
            media_type: media_type.to_string(),
            size_bytes: bytes.len() as u64,
        }
    }

    /// Hash a file on disk without loading it whole.
    pub fn from_file(path: &Path, media_type: &str) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        let digest = hash_reader(BufReader::new(file))?;
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            stored_name: unique_stored_name(&original_name),
            digest,
            media_type: media_type.to_string(),
            size_bytes,
        })
    }
}

/// `<uuid hex>_<original name>`, falling back to `file_<uuid hex>` for nameless uploads.
fn unique_stored_name(original_name: &str) -> String {
    let unique = uuid::Uuid::new_v4().simple().to_string();
    if original_name.is_empty() {
        format!("{}_file_{}", unique, uuid::Uuid::new_v4().simple())
    } else {
        format!("{}_{}", unique, original_name)
    }
}

/// An evidentiary submission as sealed into the ledger. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub report_id: String,
    pub title: String,
    pub uploader: String,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
    /// Evidence in submission order
    pub evidence: Vec<EvidenceItem>,
}

impl Report {
    /// Serialize to canonical JSON for hashing and storage.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        crate::hash::canonical_json(self)
    }

    /// Digest of the canonical JSON form.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        hash_canonical(self)
    }

    /// Merkle leaves contributed by this report: evidence digests in order, then
    /// the report digest.
    pub fn leaves(&self) -> Result<Vec<String>, serde_json::Error> {
        let mut leaves: Vec<String> = self.evidence.iter().map(|e| e.digest.clone()).collect();
        leaves.push(self.digest()?);
        Ok(leaves)
    }
}

/// Caller input to a ledger submission; the ledger assigns the report id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportCandidate {
    pub title: String,
    pub uploader: String,
    pub metadata: BTreeMap<String, String>,
    pub evidence: Vec<EvidenceItem>,
}

impl Default for ReportCandidate {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl ReportCandidate {
    /// Blank title or uploader fall back to the defaults.
    pub fn new(title: impl Into<String>, uploader: impl Into<String>) -> Self {
        let metadata = [METADATA_DESCRIPTION, METADATA_LOCATION, METADATA_TIME]
            .into_iter()
            .map(|k| (k.to_string(), String::new()))
            .collect();

        Self {
            title: non_blank_or(title.into(), DEFAULT_TITLE),
            uploader: non_blank_or(uploader.into(), DEFAULT_UPLOADER),
            metadata,
            evidence: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.with_metadata(METADATA_DESCRIPTION, description)
    }

    pub fn with_location(self, location: impl Into<String>) -> Self {
        self.with_metadata(METADATA_LOCATION, location)
    }

    pub fn with_time(self, time: impl Into<String>) -> Self {
        self.with_metadata(METADATA_TIME, time)
    }

    pub fn with_evidence(mut self, item: EvidenceItem) -> Self {
        self.evidence.push(item);
        self
    }

    /// Finalize into a report with a fresh id.
    pub fn into_report(self) -> Report {
        self.into_report_with_id(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn into_report_with_id(self, report_id: String) -> Report {
        Report {
            report_id,
            title: non_blank_or(self.title, DEFAULT_TITLE),
            uploader: non_blank_or(self.uploader, DEFAULT_UPLOADER),
            metadata: self.metadata,
            evidence: self.evidence,
        }
    }
}

fn non_blank_or(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_report() -> Report {
        ReportCandidate::new("Flooded road", "alice")
            .with_description("Water over the bridge")
            .with_evidence(EvidenceItem::from_bytes("a.jpg", "image/jpeg", b"first"))
            .with_evidence(EvidenceItem::from_bytes("b.jpg", "image/jpeg", b"second"))
            .into_report_with_id("r-1".to_string())
    }

    #[test]
    fn test_candidate_defaults() {
        let report = ReportCandidate::new("  ", "").into_report();
        assert_eq!(report.title, DEFAULT_TITLE);
        assert_eq!(report.uploader, DEFAULT_UPLOADER);
        assert_eq!(report.report_id.len(), 32);
        assert_eq!(report.metadata.get(METADATA_LOCATION), Some(&String::new()));
        assert_eq!(report.metadata.len(), 3);
    }

    #[test]
    fn test_evidence_from_bytes() {
        let item = EvidenceItem::from_bytes("photo.png", "image/png", b"abc");
        assert_eq!(
            item.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(item.size_bytes, 3);
        assert!(item.stored_name.ends_with("_photo.png"));
    }

    #[test]
    fn test_evidence_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.bin");
        std::fs::write(&path, b"abc").unwrap();

        let item = EvidenceItem::from_file(&path, "application/octet-stream").unwrap();
        assert_eq!(item.digest, hash_data(b"abc"));
        assert_eq!(item.size_bytes, 3);
        assert!(item.stored_name.ends_with("_clip.bin"));
    }

    #[test]
    fn test_report_leaves_order() {
        let report = make_report();
        let leaves = report.leaves().unwrap();

        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0], hash_data(b"first"));
        assert_eq!(leaves[1], hash_data(b"second"));
        assert_eq!(leaves[2], report.digest().unwrap());
    }

    #[test]
    fn test_canonical_json_deterministic() {
        let report = make_report();
        let json1 = report.to_canonical_json().unwrap();
        let json2 = report.clone().to_canonical_json().unwrap();
        assert_eq!(json1, json2);
        assert!(json1.starts_with(r#"{"evidence":"#));

        let roundtrip: Report = serde_json::from_str(&json1).unwrap();
        assert_eq!(roundtrip.digest().unwrap(), report.digest().unwrap());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let report = make_report();
        let mut edited = report.clone();
        edited.title.push('!');
        assert_ne!(report.digest().unwrap(), edited.digest().unwrap());
    }
}

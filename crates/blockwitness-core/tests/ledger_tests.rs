//! Ledger integration tests.

use blockwitness_core::db::Database;
use blockwitness_core::hash::{hash_data, GENESIS_PREVIOUS_HASH};
use blockwitness_core::ledger::{Ledger, MatchedLeaf, Problem};
use blockwitness_core::merkle::{merkle_root, verify_path};
use blockwitness_core::models::{EvidenceItem, ReportCandidate};

fn make_candidate(title: &str, evidence: &[&str]) -> ReportCandidate {
    evidence.iter().fold(
        ReportCandidate::new(title, "field-reporter")
            .with_description(format!("Description of {}", title))
            .with_location("Riverside"),
        |candidate, content| {
            candidate.with_evidence(EvidenceItem::from_bytes(
                &format!("{}.jpg", content),
                "image/jpeg",
                content.as_bytes(),
            ))
        },
    )
}

fn seeded_chain(n: usize) -> Database {
    let db = Database::open_in_memory().unwrap();
    let ledger = Ledger::new(&db);
    for i in 0..n {
        let e = format!("evidence-{}", i);
        ledger.submit(make_candidate(&format!("report-{}", i), &[&e])).unwrap();
    }
    db
}

#[test]
fn test_end_to_end_flow() {
    let db = Database::open_in_memory().unwrap();
    let ledger = Ledger::new(&db);

    let first = ledger.submit(make_candidate("flood", &["a", "b"])).unwrap();
    let second = ledger.submit(make_candidate("fire", &["c"])).unwrap();

    assert_eq!(first.block_index, 0);
    assert_eq!(second.block_index, 1);

    let b0 = ledger.get_block(0).unwrap().block;
    let b1 = ledger.get_block(1).unwrap().block;
    assert_eq!(b0.previous_hash, GENESIS_PREVIOUS_HASH);
    assert_eq!(b1.previous_hash, b0.block_hash);

    // Leaf set is evidence digests then the report digest
    let proof = ledger.get_merkle_proof(0, None).unwrap();
    assert_eq!(
        proof.all_leaves,
        vec![hash_data(b"a"), hash_data(b"b"), first.report_digest.clone()]
    );
    assert_eq!(merkle_root(&proof.all_leaves), b0.merkle_root);
    assert!(proof.valid);

    // Three leaves: the first evidence digest needs two steps
    let first_evidence = ledger.get_merkle_proof(0, Some(&hash_data(b"a"))).unwrap();
    assert!(first_evidence.valid);
    assert_eq!(first_evidence.leaf_index, Some(0));
    assert_eq!(first_evidence.proof.as_ref().unwrap().len(), 2);

    // Evidence leaves prove too
    let evidence_proof = ledger.get_merkle_proof(0, Some(&hash_data(b"b"))).unwrap();
    assert!(evidence_proof.valid);
    assert!(verify_path(
        &evidence_proof.leaf,
        evidence_proof.proof.as_deref().unwrap(),
        &b0.merkle_root
    ));

    let report = ledger.verify_chain().unwrap();
    assert!(report.ok);
    assert!(ledger.verify_merkle_roots().unwrap().ok);

    let recent = ledger.list_recent_blocks(Some(1)).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].block_hash, second.block_hash);
}

#[test]
fn test_submit_without_metadata_uses_defaults() {
    let db = Database::open_in_memory().unwrap();
    let ledger = Ledger::new(&db);

    let receipt = ledger.submit(ReportCandidate::default()).unwrap();
    let cert = ledger.certificate(&receipt.report_id).unwrap();
    assert_eq!(cert.report.title, "Untitled");
    assert_eq!(cert.report.uploader, "anonymous");
    assert_eq!(cert.report.metadata.get("description"), Some(&String::new()));
}

#[test]
fn test_tampered_merkle_root_flags_block_and_successor() {
    let db = seeded_chain(5);
    db.conn()
        .execute(
            "UPDATE blocks SET merkle_root = ?1 WHERE idx = 2",
            ["e".repeat(64)],
        )
        .unwrap();

    let problems = Ledger::new(&db).verify_chain().unwrap().problems;
    assert_eq!(problems.len(), 2);
    assert!(matches!(problems[0], Problem::BlockHashMismatch { index: 2, .. }));
    assert!(matches!(problems[1], Problem::PreviousHashMismatch { index: 3, .. }));

    let roots = Ledger::new(&db).verify_merkle_roots().unwrap().problems;
    assert_eq!(roots.len(), 1);
    assert!(matches!(roots[0], Problem::MerkleRootMismatch { index: 2, .. }));
}

#[test]
fn test_tampered_timestamp_flags_block_and_successor() {
    let db = seeded_chain(3);
    db.conn()
        .execute(
            "UPDATE blocks SET timestamp = '1999-01-01T00:00:00+0000' WHERE idx = 0",
            [],
        )
        .unwrap();

    let report = Ledger::new(&db).verify_chain().unwrap();
    assert!(!report.ok);
    assert_eq!(report.problems.len(), 2);
    assert!(matches!(report.problems[0], Problem::BlockHashMismatch { index: 0, .. }));
    assert!(matches!(report.problems[1], Problem::PreviousHashMismatch { index: 1, .. }));
}

#[test]
fn test_tampered_tail_flags_only_tail() {
    let db = seeded_chain(3);
    db.conn()
        .execute("UPDATE blocks SET merkle_root = ?1 WHERE idx = 2", ["0".repeat(64)])
        .unwrap();

    let problems = Ledger::new(&db).verify_chain().unwrap().problems;
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].index(), 2);
}

#[test]
fn test_tampered_report_body_breaks_merkle_root_only() {
    let db = seeded_chain(2);
    let tx = db.get_transactions_for_block(1).unwrap().remove(0);
    let mut report = db.get_report(&tx.report_id).unwrap().unwrap();
    report.title = "rewritten".to_string();
    db.conn()
        .execute(
            "UPDATE reports SET body = ?1 WHERE report_id = ?2",
            [report.to_canonical_json().unwrap(), tx.report_id.clone()],
        )
        .unwrap();

    let ledger = Ledger::new(&db);
    assert!(ledger.verify_chain().unwrap().ok);

    let roots = ledger.verify_merkle_roots().unwrap();
    assert_eq!(roots.problems.len(), 1);
    assert!(matches!(roots.problems[0], Problem::MerkleRootMismatch { index: 1, .. }));

    // The stored report digest no longer proves against the stored root
    let proof = ledger.get_merkle_proof(1, Some(&tx.report_digest)).unwrap();
    assert!(proof.proof.is_none());
    assert!(!proof.valid);
}

#[test]
fn test_find_by_digest_across_blocks() {
    let db = Database::open_in_memory().unwrap();
    let ledger = Ledger::new(&db);
    ledger.submit(make_candidate("one", &["shared", "x"])).unwrap();
    ledger.submit(make_candidate("two", &["y"])).unwrap();
    let third = ledger.submit(make_candidate("three", &["shared"])).unwrap();

    let matches = ledger.find_by_digest(&hash_data(b"shared")).unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].block_index, 0);
    assert_eq!(matches[1].block_index, 2);
    assert_eq!(matches[1].tx_id, third.tx_id);
    match &matches[1].matched {
        MatchedLeaf::Evidence { stored_name } => assert!(stored_name.ends_with("_shared.jpg")),
        other => panic!("unexpected match: {:?}", other),
    }

    let by_report = ledger.find_by_digest(&third.report_digest).unwrap();
    assert_eq!(by_report.len(), 1);
    assert_eq!(by_report[0].matched, MatchedLeaf::Report);
}

#[test]
fn test_certificate_links_to_block() {
    let db = seeded_chain(2);
    let ledger = Ledger::new(&db);
    let tx = db.get_transactions_for_block(1).unwrap().remove(0);

    let cert = ledger.certificate(&tx.report_id).unwrap();
    assert_eq!(cert.block.index, 1);
    assert_eq!(cert.transaction, tx);
    assert_eq!(cert.report.digest().unwrap(), tx.report_digest);
    assert!(cert.verification_url.ends_with("/explorer?block=1"));
}

#[test]
fn test_timeline_newest_first() {
    let db = seeded_chain(3);
    let timeline = Ledger::new(&db).timeline().unwrap();

    let indices: Vec<u64> = timeline.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![2, 1, 0]);
    assert_eq!(timeline[2].transactions[0].title, "report-0");
}

#[test]
fn test_file_backed_ledger_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let receipt = {
        let db = Database::open(&path).unwrap();
        Ledger::new(&db).submit(make_candidate("persisted", &["p"])).unwrap()
    };

    let db = Database::open(&path).unwrap();
    let ledger = Ledger::new(&db);
    assert_eq!(db.block_count().unwrap(), 1);
    assert_eq!(ledger.get_block(0).unwrap().block.block_hash, receipt.block_hash);
    assert!(ledger.verify_chain().unwrap().ok);
}

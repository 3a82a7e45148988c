use std::sync::{Arc, Mutex};

use anyhow::Result;

use medledger_core::{
    block::{self, BlockLog},
    events::{EventKind, LedgerEvent},
    model::{MedicineDetails, RegisterMedicine, SupplyStage},
    proof::BatchProof,
    util, AuthenticityLedger as _, Engine,
};

fn amoxicillin() -> RegisterMedicine {
    let expiry = time::OffsetDateTime::now_utc() + time::Duration::days(365);
    RegisterMedicine {
        batch_id: "B-001".into(),
        name: "Amoxicillin".into(),
        manufacturer_id: "MFG-001".into(),
        manufacturer_name: "Acme Pharma".into(),
        manufacturing_date: "2025-01-01".into(),
        expiry_date: util::format_rfc3339(expiry),
        details: MedicineDetails::default(),
    }
}

#[test]
fn register_then_verify_scenario() -> Result<()> {
    let mut engine = Engine::new(2)?;
    engine.register(amoxicillin())?;
    assert_eq!(engine.chain_len(), 2);

    let out = engine.verify("B-001");
    assert!(out.is_authentic);
    assert_eq!(out.record.as_ref().map(|m| m.scan_count), Some(1));
    assert_eq!(engine.chain_len(), 3);
    assert!(engine.blocks().iter().all(|b| b.hash.starts_with("00")));
    assert!(engine.verify_integrity());
    Ok(())
}

#[test]
fn unknown_batch_on_empty_engine_scenario() -> Result<()> {
    let mut engine = Engine::new(1)?;
    let out = engine.verify("UNKNOWN-1");
    assert!(!out.is_authentic);
    assert_eq!(engine.alerts().len(), 1);
    assert!(engine.alerts()[0].reason.contains("not found"));
    assert!(engine.medicines().is_empty());
    Ok(())
}

#[test]
fn block_log_detects_tamper() -> Result<()> {
    let mut log = BlockLog::new(1)?;
    log.append(serde_json::json!({ "event": "a" }));
    log.append(serde_json::json!({ "event": "b" }));
    assert!(log.verify_integrity());

    let mut blocks = log.blocks().to_vec();
    blocks[1].payload = serde_json::json!({ "event": "forged" });
    let forged = BlockLog::from_blocks(blocks, 1)?;
    assert!(!forged.verify_integrity());
    Ok(())
}

#[test]
fn genesis_block_shape() -> Result<()> {
    let log = BlockLog::new(1)?;
    let g = log.head();
    assert_eq!(g.index, 0);
    assert_eq!(g.previous_hash, block::GENESIS_PREV_HASH);
    assert_eq!(g.payload, block::genesis_payload());
    assert_eq!(g.hash, g.compute_hash());
    Ok(())
}

#[test]
fn excessive_difficulty_refused() {
    assert!(Engine::new(block::MAX_DIFFICULTY + 1).is_err());
}

#[test]
fn snapshot_round_trip_law() -> Result<()> {
    let mut engine = Engine::new(1)?;
    engine.register(amoxicillin())?;
    engine.transfer("B-001", SupplyStage::Shipped, "carrier", "Hamburg")?;
    engine.verify("B-001");
    engine.verify("B-404");

    let json = serde_json::to_string(&engine.snapshot())?;
    let restored = Engine::restore(serde_json::from_str(&json)?)?;

    let hashes = |e: &Engine| e.blocks().iter().map(|b| b.hash.clone()).collect::<Vec<_>>();
    assert_eq!(hashes(&restored), hashes(&engine));
    let ids = |e: &Engine| e.medicines().iter().map(|m| m.batch_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&restored), ids(&engine));
    assert_eq!(restored.medicine("B-001"), engine.medicine("B-001"));
    assert_eq!(restored.transactions(), engine.transactions());
    assert_eq!(restored.scan_history(), engine.scan_history());
    assert!(restored.verify_integrity());
    Ok(())
}

#[test]
fn subscribers_see_each_event_kind() -> Result<()> {
    let mut engine = Engine::new(1)?;
    let seen: Arc<Mutex<Vec<EventKind>>> = Arc::default();
    for kind in [
        EventKind::MedicineRegistered,
        EventKind::MedicineTransferred,
        EventKind::VerificationCompleted,
        EventKind::AlertRaised,
        EventKind::StatusChanged,
    ] {
        let sink = Arc::clone(&seen);
        engine.subscribe(kind, move |ev: &LedgerEvent| sink.lock().unwrap().push(ev.kind()));
    }

    engine.register(amoxicillin())?;
    engine.transfer("B-001", SupplyStage::Delivered, "pharmacy", "Lyon")?;
    engine.verify("B-001");
    engine.mark_sold("B-001")?;
    engine.verify("B-001");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EventKind::MedicineRegistered,
            EventKind::MedicineTransferred,
            EventKind::VerificationCompleted,
            EventKind::StatusChanged,
            EventKind::AlertRaised,
            EventKind::VerificationCompleted,
        ]
    );
    Ok(())
}

#[test]
fn unsubscribed_callback_stays_silent() -> Result<()> {
    let mut engine = Engine::new(1)?;
    let hits: Arc<Mutex<usize>> = Arc::default();
    let sink = Arc::clone(&hits);
    let id = engine.subscribe(EventKind::AlertRaised, move |_| *sink.lock().unwrap() += 1);
    engine.verify("X-1");
    assert!(engine.unsubscribe(id));
    engine.verify("X-2");
    assert_eq!(*hits.lock().unwrap(), 1);
    Ok(())
}

#[test]
fn proof_payload_cross_checks() -> Result<()> {
    let mut engine = Engine::new(1)?;
    engine.register(amoxicillin())?;
    let encoded = engine.proof("B-001")?.encode()?;

    let proof = BatchProof::decode(&encoded)?;
    assert_eq!(proof.batch_id, "B-001");
    assert_eq!(proof.block_index, 1);
    assert!(engine.check_proof(&proof).valid);

    let other = Engine::new(1)?;
    let check = other.check_proof(&proof);
    assert!(!check.valid);
    Ok(())
}

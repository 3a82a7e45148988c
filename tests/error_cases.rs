use anyhow::Result;
use tempfile::tempdir;

use medledger_core::{
    config::MedLedgerConfig,
    error::{ExitCode, LedgerError},
    model::{MedicineDetails, RegisterMedicine},
    proof::BatchProof,
    store::{self, SqliteStore},
    AuthenticityLedger as _, Engine,
};

fn req(batch_id: &str) -> RegisterMedicine {
    RegisterMedicine {
        batch_id: batch_id.into(),
        name: "Cetirizine".into(),
        manufacturer_id: "MFG-8".into(),
        manufacturer_name: "Tailspin Labs".into(),
        manufacturing_date: "2025-06-01".into(),
        expiry_date: "2099-06-01".into(),
        details: MedicineDetails::default(),
    }
}

#[test]
fn corrupt_db_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("corrupt.db");
    std::fs::write(&db_path, b"not-a-sqlite-db")?;

    let err = SqliteStore::open_existing(&db_path).unwrap_err();
    assert_eq!(ExitCode::from(&err), ExitCode::StoreError);
    Ok(())
}

#[test]
fn blank_or_oversized_batch_ids_rejected() -> Result<()> {
    let mut engine = Engine::new(0)?;
    let long = "x".repeat(200);
    for bad in ["", "   ", "\t\n", long.as_str()] {
        let err = engine.register(req(bad)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)), "{bad:?} accepted");
    }
    assert_eq!(engine.chain_len(), 1);
    Ok(())
}

#[test]
fn malformed_dates_rejected() -> Result<()> {
    let mut engine = Engine::new(0)?;
    let r = RegisterMedicine {
        manufacturing_date: "yesterday".into(),
        ..req("B-1")
    };
    assert!(matches!(engine.register(r), Err(LedgerError::InvalidInput(_))));
    Ok(())
}

#[test]
fn tampered_snapshot_file_refused() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ledger.json");
    let mut engine = Engine::new(1)?;
    engine.register(req("B-1"))?;
    store::export_json(&engine, &path)?;

    let text = std::fs::read_to_string(&path)?;
    std::fs::write(&path, text.replace("Cetirizine", "Placebo"))?;

    let err = store::import_json(&path).unwrap_err();
    assert!(matches!(err, LedgerError::ChainIntegrity(_)));
    assert_eq!(ExitCode::from(&err), ExitCode::ChainIntegrity);
    Ok(())
}

#[test]
fn truncated_snapshot_file_refused() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("ledger.json");
    std::fs::write(&path, br#"{"format":"medledger-snapshot-v1","blocks":["#)?;
    assert!(matches!(store::import_json(&path), Err(LedgerError::Store(_))));
    Ok(())
}

#[test]
fn malformed_config_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("medledger.toml");
    std::fs::write(&path, "[engine\ndifficulty = ")?;
    let err = MedLedgerConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, LedgerError::Config(_)));
    Ok(())
}

#[test]
fn bad_proof_payload_is_invalid_input() {
    let err = BatchProof::decode("not base64 at all!").unwrap_err();
    assert_eq!(ExitCode::from(&err), ExitCode::InvalidInput);
}

use anyhow::Result;
use tempfile::tempdir;

use medledger_core::{
    model::{MedicineDetails, RegisterMedicine, SupplyStage},
    report,
    store::{self, SqliteStore},
    AuthenticityLedger as _, Engine,
};

fn req(batch_id: &str, expiry: &str) -> RegisterMedicine {
    RegisterMedicine {
        batch_id: batch_id.into(),
        name: "Losartan".into(),
        manufacturer_id: "MFG-12".into(),
        manufacturer_name: "Woodgrove Pharma".into(),
        manufacturing_date: "2025-03-15".into(),
        expiry_date: expiry.into(),
        details: MedicineDetails {
            medicine_type: "Antihypertensive".into(),
            quantity: "2400 tablets".into(),
            ..MedicineDetails::default()
        },
    }
}

#[test]
fn full_pipeline_smoke() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ledger.db");
    let out_dir = dir.path().join("audit-pack");

    // First "process": register and ship.
    {
        let mut store = SqliteStore::open_or_create(&db_path, 1)?;
        let mut engine = store.load_engine()?;
        engine.set_caller("MFG-12");
        engine.register(req("LOS-1", "2099-12-31"))?;
        engine.register(req("LOS-2", "2021-12-31"))?;
        engine.transfer("LOS-1", SupplyStage::Shipped, "", "Warehouse 3")?;
        store.save(&engine.snapshot())?;
    }

    // Second "process": reopen, verify, audit.
    let mut store = SqliteStore::open_existing(&db_path)?;
    let mut engine = store.load_engine()?;
    assert_eq!(engine.chain_len(), 4);
    engine.set_caller("pharmacy-1");
    assert!(engine.verify("LOS-1").is_authentic);
    assert!(!engine.verify("LOS-2").is_authentic);
    assert!(!engine.verify("LOS-X").is_authentic);
    assert_eq!(store.save(&engine.snapshot())?, 3);
    assert_eq!(store.stored_height()?, 7);

    let manifest = report::write_audit_pack(&out_dir, &engine)?;
    assert!(manifest.integrity_ok);
    assert_eq!(manifest.chain_length, 7);
    assert_eq!(manifest.stats.scans, 3);
    assert_eq!(manifest.stats.alerts, 2);
    for f in [
        "manifest.json",
        "chain.json",
        "alerts.json",
        "audit_report.tex",
        "audit_report.pdf",
    ] {
        assert!(out_dir.join(f).exists(), "missing {f}");
    }
    let pdf = std::fs::read(out_dir.join("audit_report.pdf"))?;
    assert!(pdf.starts_with(b"%PDF-"));

    // Backup / restore through JSON.
    let backup = dir.path().join("backup.json");
    store::export_json(&engine, &backup)?;
    let imported = store::import_json(&backup)?;
    assert_eq!(imported.blocks(), engine.blocks());
    assert_eq!(imported.alerts(), engine.alerts());

    // Proof issued by one copy checks out against the other.
    let proof = engine.proof("LOS-1")?;
    assert!(imported.check_proof(&proof).valid);
    Ok(())
}

#[test]
fn reopened_store_keeps_its_difficulty() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("ledger.db");
    {
        let mut store = SqliteStore::create_new(&db_path, 2)?;
        store.save(&Engine::new(2)?.snapshot())?;
    }
    let store = SqliteStore::open_or_create(&db_path, 0)?;
    assert_eq!(store.meta().difficulty, 2);
    let engine = store.load_engine()?;
    assert_eq!(engine.chain().difficulty(), 2);
    Ok(())
}

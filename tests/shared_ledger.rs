use std::thread;

use anyhow::Result;
use tempfile::tempdir;

use medledger_core::{
    model::{MedicineDetails, MedicineStatus, RegisterMedicine, SupplyStage},
    shared::SharedLedger,
    store::SqliteStore,
    AuthenticityLedger as _, Engine,
};

fn req(batch_id: &str) -> RegisterMedicine {
    RegisterMedicine {
        batch_id: batch_id.into(),
        name: "Omeprazole".into(),
        manufacturer_id: "MFG-4".into(),
        manufacturer_name: "Litware Pharma".into(),
        manufacturing_date: "2025-07-01".into(),
        expiry_date: "2099-07-01".into(),
        details: MedicineDetails::default(),
    }
}

#[test]
fn concurrent_writers_produce_one_linear_chain() -> Result<()> {
    let shared = SharedLedger::new(Engine::new(1)?);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ledger = shared.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..5 {
                    let id = format!("T{t}-{i}");
                    ledger.register(req(&id))?;
                    ledger.transfer(&id, SupplyStage::Shipped, "carrier", "Depot")?;
                    ledger.verify(&id)?;
                }
                Ok(())
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked")?;
    }

    assert_eq!(shared.chain_len()?, 1 + 4 * 5 * 3);
    assert!(shared.verify_integrity()?);
    let stats = shared.stats()?;
    assert_eq!(stats.medicines, 20);
    assert_eq!(stats.authentic_scans, 20);
    shared.read(|l| {
        for (i, b) in l.blocks().iter().enumerate() {
            assert_eq!(b.index as usize, i);
        }
    })?;
    Ok(())
}

#[test]
fn every_mutation_is_persisted() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("shared.db");
    let mut store = SqliteStore::create_new(&db_path, 0)?;
    let shared = SharedLedger::with_persist(Engine::new(0)?, move |e: &Engine| {
        store.save(&e.snapshot()).map(|_| ())
    });

    shared.register(req("S-1"))?;
    shared.flag_medicine("S-1", "tamper seal")?;
    shared.mark_sold("S-1")?;

    let reloaded = SqliteStore::open_existing(&db_path)?.load_engine()?;
    assert_eq!(reloaded.chain_len(), 4);
    assert_eq!(reloaded.alerts().len(), 1);
    let status = reloaded.medicine("S-1").map(|m| m.status);
    assert_eq!(status, Some(MedicineStatus::Sold));
    assert_eq!(shared.medicine("S-1")?.map(|m| m.status), status);
    Ok(())
}

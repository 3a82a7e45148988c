//! The caller-facing operation surface shared by every ledger backend.
//!
//! [`crate::engine::Engine`] is the in-process reference implementation and
//! [`crate::contract::ContractLedger`] is the rendition meant to run inside
//! an external consensus runtime.  Both implement [`AuthenticityLedger`]
//! with identical semantics.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::Result;
use crate::model::{
    Alert, Medicine, MedicineDetails, RegisterMedicine, ScanEntry, SupplyStage, Transaction,
};
use crate::query::{self, Stats};
use crate::util;
use crate::verification::VerificationOutcome;

/// A committed mutation: the updated record plus the transaction and block
/// that confirmed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committed {
    pub record: Medicine,
    pub transaction: Transaction,
    pub block: Block,
}

pub trait AuthenticityLedger {
    /// Identity recorded on transactions, alerts and scans.  Trusted as given.
    fn caller(&self) -> &str;
    fn set_caller(&mut self, caller: &str);

    /// Register a new batch.  Fails with `DuplicateBatch` or `InvalidInput`
    /// and leaves the ledger untouched on failure.
    fn register(&mut self, req: RegisterMedicine) -> Result<Committed>;

    fn set_details(&mut self, batch_id: &str, details: MedicineDetails) -> Result<Medicine>;

    /// Run the verification algorithm.  Never fails; every attempt is logged.
    fn verify(&mut self, batch_id: &str) -> VerificationOutcome;

    fn transfer(
        &mut self,
        batch_id: &str,
        stage: SupplyStage,
        actor: &str,
        location: &str,
    ) -> Result<Committed>;

    fn mark_sold(&mut self, batch_id: &str) -> Result<Medicine>;

    /// Flag a batch as suspected counterfeit.  Raises an alert even when the
    /// batch is unknown.
    fn flag_medicine(&mut self, batch_id: &str, reason: &str) -> Alert;

    fn create_alert(&mut self, batch_id: &str, reason: &str) -> Alert;

    fn medicine(&self, batch_id: &str) -> Option<&Medicine>;
    /// Every registered record, ordered by batch id.
    fn medicines(&self) -> Vec<&Medicine>;
    fn blocks(&self) -> &[Block];
    fn verify_integrity(&self) -> bool;
    fn alerts(&self) -> &[Alert];
    fn transactions(&self) -> &[Transaction];
    fn scan_history(&self) -> &[ScanEntry];

    fn chain_len(&self) -> usize {
        self.blocks().len()
    }

    fn stats(&self) -> Stats {
        query::compute_stats(
            self.medicines(),
            self.alerts(),
            self.chain_len(),
            self.transactions().len(),
            self.scan_history(),
        )
    }

    fn recent_transactions(&self, n: usize) -> Vec<&Transaction> {
        query::recent_transactions(self.transactions(), n)
    }

    fn search(&self, query: &str) -> Vec<&Medicine> {
        query::search(self.medicines(), query)
    }
}

/// Precondition checks common to every backend's `register`.
pub(crate) fn validate_registration(req: &RegisterMedicine) -> Result<()> {
    util::validate_batch_id(&req.batch_id)?;
    util::require_non_empty(&req.name, "name")?;
    util::require_non_empty(&req.manufacturer_id, "manufacturer id")?;
    util::parse_timestamp(&req.manufacturing_date)?;
    util::parse_timestamp(&req.expiry_date)?;
    Ok(())
}

/// Canonical registration payload committed to the chain.
pub(crate) fn registration_payload(req: &RegisterMedicine) -> serde_json::Value {
    serde_json::json!({
        "batch_id": req.batch_id,
        "name": req.name,
        "manufacturer_id": req.manufacturer_id,
        "manufacturer_name": req.manufacturer_name,
        "manufacturing_date": req.manufacturing_date,
        "expiry_date": req.expiry_date,
        "details": req.details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> RegisterMedicine {
        RegisterMedicine {
            batch_id: "B-001".into(),
            name: "Amoxicillin".into(),
            manufacturer_id: "MFG-1".into(),
            manufacturer_name: "Acme Pharma".into(),
            manufacturing_date: "2025-01-01".into(),
            expiry_date: "2027-01-01".into(),
            details: MedicineDetails::default(),
        }
    }

    #[test]
    fn well_formed_registration_passes() {
        assert!(validate_registration(&req()).is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let r = RegisterMedicine { name: " ".into(), ..req() };
        assert!(validate_registration(&r).is_err());
    }

    #[test]
    fn bad_expiry_rejected() {
        let r = RegisterMedicine { expiry_date: "31/12/2027".into(), ..req() };
        assert!(validate_registration(&r).is_err());
    }

    #[test]
    fn payload_carries_details() {
        let mut r = req();
        r.details.quantity = "500 boxes".into();
        let p = registration_payload(&r);
        assert_eq!(p["details"]["quantity"], "500 boxes");
        assert_eq!(p["batch_id"], "B-001");
    }
}

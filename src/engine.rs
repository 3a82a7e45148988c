//! In-process reference engine.
//!
//! Owns the proof-of-work block log and all derived state.  Each mutating
//! operation checks its preconditions first, then mines exactly one block,
//! confirms exactly one transaction, updates the derived state, and finally
//! notifies subscribers.  A failed precondition leaves everything untouched.

use std::collections::BTreeMap;

use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::block::{Block, BlockLog};
use crate::config::EngineConfig;
use crate::error::{LedgerError, OptionExt as _, Result};
use crate::events::{EventBus, EventKind, LedgerEvent, SubscriptionId};
use crate::ledger::{self, AuthenticityLedger, Committed};
use crate::model::{
    Alert, Checkpoint, Medicine, MedicineDetails, MedicineStatus, RegisterMedicine, ScanEntry,
    ScanVerdict, Severity, SupplyStage, Transaction, TransactionKind, VerificationRecord,
};
use crate::proof::{self, BatchProof, ProofCheck};
use crate::store::{LedgerSnapshot, SNAPSHOT_FORMAT};
use crate::util;
use crate::verification::{self, VerificationOutcome};

pub const DEFAULT_CALLER: &str = "system";

pub struct Engine {
    chain: BlockLog,
    medicines: BTreeMap<String, Medicine>,
    transactions: Vec<Transaction>,
    alerts: Vec<Alert>,
    scan_history: Vec<ScanEntry>,
    caller: String,
    events: EventBus,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("blocks", &self.chain.len())
            .field("medicines", &self.medicines.len())
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(difficulty: usize) -> Result<Self> {
        Ok(Self {
            chain: BlockLog::new(difficulty)?,
            medicines: BTreeMap::new(),
            transactions: Vec::new(),
            alerts: Vec::new(),
            scan_history: Vec::new(),
            caller: DEFAULT_CALLER.to_string(),
            events: EventBus::new(),
        })
    }

    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let mut engine = Self::new(cfg.difficulty)?;
        engine.caller = cfg.operator_id.clone();
        Ok(engine)
    }

    pub fn chain(&self) -> &BlockLog {
        &self.chain
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn proof(&self, batch_id: &str) -> Result<BatchProof> {
        proof::issue(self, batch_id)
    }

    pub fn check_proof(&self, proof: &BatchProof) -> ProofCheck {
        proof.check_against(self)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            exported_at_utc: util::now_utc_rfc3339(),
            difficulty: self.chain.difficulty(),
            blocks: self.chain.blocks().to_vec(),
            medicines: self.medicines.clone(),
            transactions: self.transactions.clone(),
            alerts: self.alerts.clone(),
            scan_history: self.scan_history.clone(),
        }
    }

    /// Rebuild an engine from a snapshot.  Refuses a chain that fails the
    /// integrity walk.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(LedgerError::Store(format!(
                "unsupported snapshot format '{}'",
                snapshot.format
            )));
        }
        let chain = BlockLog::from_blocks(snapshot.blocks, snapshot.difficulty)?;
        if !chain.verify_integrity() {
            return Err(LedgerError::ChainIntegrity(
                "snapshot chain failed integrity verification".into(),
            ));
        }
        let len = chain.len() as u64;
        if let Some(m) = snapshot.medicines.values().find(|m| m.block_index >= len) {
            return Err(LedgerError::ChainIntegrity(format!(
                "batch {} references block #{} beyond chain of {len}",
                m.batch_id, m.block_index
            )));
        }
        Ok(Self {
            chain,
            medicines: snapshot.medicines,
            transactions: snapshot.transactions,
            alerts: snapshot.alerts,
            scan_history: snapshot.scan_history,
            caller: DEFAULT_CALLER.to_string(),
            events: EventBus::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Create the transaction, mine its block, and confirm it.
    fn commit(
        &mut self,
        event: &str,
        batch_id: &str,
        kind: TransactionKind,
        data: serde_json::Value,
        to: Option<&str>,
    ) -> (Transaction, Block) {
        let mut tx = Transaction::new(kind, data, &self.caller, to);
        let payload = json!({
            "event": event,
            "batch_id": batch_id,
            "tx_id": tx.id,
            "tx_hash": tx.hash,
            "from": tx.from,
            "data": tx.payload,
        });
        let block = self.chain.append(payload).clone();
        tx.confirm(block.index);
        self.transactions.push(tx.clone());
        (tx, block)
    }

    fn push_alert(
        &mut self,
        batch_id: &str,
        reason: String,
        severity: Severity,
        block_index: u64,
    ) -> Alert {
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            batch_id: batch_id.to_string(),
            reason,
            reported_by: self.caller.clone(),
            timestamp: util::now_utc_rfc3339(),
            severity,
            resolved: false,
            block_index,
        };
        warn!(batch_id, reason = %alert.reason, severity = %severity, "alert raised");
        self.alerts.push(alert.clone());
        alert
    }

    fn raise_alert(
        &mut self,
        batch_id: &str,
        reason: &str,
        severity: Severity,
        event: &str,
    ) -> Alert {
        let data = json!({
            "batch_id": batch_id,
            "reason": reason,
            "severity": severity,
            "batch_known": self.medicines.contains_key(batch_id),
        });
        let (_, block) = self.commit(event, batch_id, TransactionKind::Alert, data, None);
        let alert = self.push_alert(batch_id, reason.to_string(), severity, block.index);
        self.events.publish(&LedgerEvent::AlertRaised {
            alert: alert.clone(),
        });
        alert
    }

    fn set_status(&mut self, batch_id: &str, status: MedicineStatus) -> Option<Medicine> {
        let record = self.medicines.get_mut(batch_id)?;
        record.status = status;
        let record = record.clone();
        self.events.publish(&LedgerEvent::StatusChanged {
            batch_id: batch_id.to_string(),
            status,
        });
        Some(record)
    }
}

impl AuthenticityLedger for Engine {
    fn caller(&self) -> &str {
        &self.caller
    }

    fn set_caller(&mut self, caller: &str) {
        self.caller = caller.to_string();
    }

    fn register(&mut self, req: RegisterMedicine) -> Result<Committed> {
        ledger::validate_registration(&req)?;
        if self.medicines.contains_key(&req.batch_id) {
            return Err(LedgerError::DuplicateBatch(req.batch_id));
        }

        let payload = ledger::registration_payload(&req);
        let (transaction, block) = self.commit(
            "medicine_registered",
            &req.batch_id,
            TransactionKind::Registration,
            payload,
            None,
        );

        let actor = if req.manufacturer_name.trim().is_empty() {
            req.manufacturer_id.clone()
        } else {
            req.manufacturer_name.clone()
        };
        let record = Medicine {
            supply_chain: vec![Checkpoint {
                stage: SupplyStage::Manufactured,
                actor,
                location: "Manufacturing facility".to_string(),
                timestamp: transaction.timestamp.clone(),
                block_index: block.index,
            }],
            batch_id: req.batch_id,
            name: req.name,
            manufacturer_id: req.manufacturer_id,
            manufacturer_name: req.manufacturer_name,
            manufacturing_date: req.manufacturing_date,
            expiry_date: req.expiry_date,
            details: req.details,
            status: MedicineStatus::Active,
            scan_count: 0,
            verifications: Vec::new(),
            registered_at: transaction.timestamp.clone(),
            block_index: block.index,
            block_hash: block.hash.clone(),
        };
        self.medicines.insert(record.batch_id.clone(), record.clone());

        info!(batch_id = %record.batch_id, block = block.index, "medicine registered");
        self.events.publish(&LedgerEvent::MedicineRegistered {
            record: record.clone(),
            block_index: block.index,
        });
        Ok(Committed {
            record,
            transaction,
            block,
        })
    }

    fn set_details(&mut self, batch_id: &str, details: MedicineDetails) -> Result<Medicine> {
        self.medicines.get(batch_id).required_batch(batch_id)?;

        let data = json!({ "batch_id": batch_id, "details": details });
        self.commit("details_updated", batch_id, TransactionKind::Registration, data, None);

        let record = self.medicines.get_mut(batch_id).required_batch(batch_id)?;
        record.details = details;
        let record = record.clone();
        info!(batch_id, "medicine details updated");
        self.events.publish(&LedgerEvent::DetailsUpdated {
            record: record.clone(),
        });
        Ok(record)
    }

    fn verify(&mut self, batch_id: &str) -> VerificationOutcome {
        let eval = verification::evaluate(
            batch_id,
            self.medicines.get(batch_id),
            OffsetDateTime::now_utc(),
            self.chain.len() as u64,
        );
        let found = self.medicines.contains_key(batch_id);
        let kind = if eval.is_authentic {
            TransactionKind::Verification
        } else {
            TransactionKind::Alert
        };
        let data = json!({
            "batch_id": batch_id,
            "is_authentic": eval.is_authentic,
            "checks": eval.checks,
        });
        let (tx, block) = self.commit("verification", batch_id, kind, data, None);

        let verdict = match (found, eval.is_authentic) {
            (false, _) => ScanVerdict::Counterfeit,
            (true, true) => ScanVerdict::Authentic,
            (true, false) => ScanVerdict::Suspicious,
        };
        let record = self.medicines.get_mut(batch_id).map(|m| {
            m.scan_count += 1;
            m.verifications.push(VerificationRecord {
                timestamp: tx.timestamp.clone(),
                is_authentic: eval.is_authentic,
                verified_by: tx.from.clone(),
                block_index: block.index,
            });
            m.clone()
        });
        self.scan_history.push(ScanEntry {
            batch_id: batch_id.to_string(),
            verdict,
            scanned_by: tx.from.clone(),
            timestamp: tx.timestamp.clone(),
            block_index: block.index,
        });

        if eval.is_authentic {
            info!(batch_id, block = block.index, "verification passed");
        } else {
            let (reason, severity) = if found {
                ("verification checks failed".to_string(), Severity::High)
            } else {
                (format!("Batch {batch_id} not found on blockchain"), Severity::Critical)
            };
            let alert = self.push_alert(batch_id, reason, severity, block.index);
            self.events.publish(&LedgerEvent::AlertRaised { alert });
        }

        let outcome = VerificationOutcome {
            batch_id: batch_id.to_string(),
            is_authentic: eval.is_authentic,
            checks: eval.checks,
            record,
            timestamp: tx.timestamp,
            block_index: block.index,
        };
        self.events.publish(&LedgerEvent::VerificationCompleted {
            batch_id: outcome.batch_id.clone(),
            is_authentic: outcome.is_authentic,
            checks: outcome.checks.clone(),
            record: outcome.record.clone(),
        });
        outcome
    }

    fn transfer(
        &mut self,
        batch_id: &str,
        stage: SupplyStage,
        actor: &str,
        location: &str,
    ) -> Result<Committed> {
        self.medicines.get(batch_id).required_batch(batch_id)?;

        let actor = if actor.trim().is_empty() {
            self.caller.clone()
        } else {
            actor.to_string()
        };
        let data = json!({
            "batch_id": batch_id,
            "stage": stage,
            "actor": actor,
            "location": location,
        });
        let (transaction, block) = self.commit(
            "medicine_transferred",
            batch_id,
            TransactionKind::Transfer,
            data,
            Some(actor.as_str()),
        );

        let checkpoint = Checkpoint {
            stage,
            actor,
            location: location.to_string(),
            timestamp: transaction.timestamp.clone(),
            block_index: block.index,
        };
        let record = self.medicines.get_mut(batch_id).required_batch(batch_id)?;
        record.supply_chain.push(checkpoint.clone());
        let record = record.clone();

        info!(batch_id, stage = %checkpoint.stage, block = block.index, "medicine transferred");
        self.events.publish(&LedgerEvent::MedicineTransferred {
            batch_id: batch_id.to_string(),
            checkpoint,
        });
        Ok(Committed {
            record,
            transaction,
            block,
        })
    }

    fn mark_sold(&mut self, batch_id: &str) -> Result<Medicine> {
        self.medicines.get(batch_id).required_batch(batch_id)?;

        let data = json!({ "batch_id": batch_id, "status": MedicineStatus::Sold });
        self.commit("status_changed", batch_id, TransactionKind::Transfer, data, None);

        let record = self
            .set_status(batch_id, MedicineStatus::Sold)
            .required_batch(batch_id)?;
        info!(batch_id, "medicine marked as sold");
        Ok(record)
    }

    fn flag_medicine(&mut self, batch_id: &str, reason: &str) -> Alert {
        let alert = self.raise_alert(batch_id, reason, Severity::High, "medicine_flagged");
        if self.set_status(batch_id, MedicineStatus::Flagged).is_none() {
            warn!(batch_id, "flagged batch is not registered");
        }
        alert
    }

    fn create_alert(&mut self, batch_id: &str, reason: &str) -> Alert {
        self.raise_alert(batch_id, reason, Severity::Medium, "alert_created")
    }

    fn medicine(&self, batch_id: &str) -> Option<&Medicine> {
        self.medicines.get(batch_id)
    }

    fn medicines(&self) -> Vec<&Medicine> {
        self.medicines.values().collect()
    }

    fn blocks(&self) -> &[Block] {
        self.chain.blocks()
    }

    fn verify_integrity(&self) -> bool {
        self.chain.verify_integrity()
    }

    fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    fn scan_history(&self) -> &[ScanEntry] {
        &self.scan_history
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

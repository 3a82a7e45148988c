//! Medicine registry as contract logic for an external consensus runtime.
//!
//! The host chain seals one block per call.  Consensus happens outside the
//! contract, so host blocks are hash-linked but carry no proof of work.
//! A call whose preconditions fail reverts: no storage write, no block.
//! State changes are emitted as [`ContractLog`]s rather than callbacks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::block::{Block, BlockLog};
use crate::error::{LedgerError, OptionExt as _, Result};
use crate::ledger::{self, AuthenticityLedger, Committed};
use crate::model::{
    Alert, Checkpoint, Medicine, MedicineDetails, MedicineStatus, RegisterMedicine, ScanEntry,
    ScanVerdict, Severity, SupplyStage, Transaction, TransactionKind, VerificationRecord,
};
use crate::util;
use crate::verification::{self, VerificationOutcome};

pub const CONTRACT_NAME: &str = "MedicineRegistry";

/// Host blocks are sealed by external consensus.
const HOST_DIFFICULTY: usize = 0;

/// Event log entry emitted by a contract call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractLog {
    pub block_number: u64,
    pub event: String,
    pub batch_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug)]
pub struct ContractLedger {
    host: BlockLog,
    medicines: HashMap<String, Medicine>,
    /// Insertion-ordered keys; contract mappings are not iterable.
    batch_index: Vec<String>,
    receipts: Vec<Transaction>,
    alerts: Vec<Alert>,
    scans: Vec<ScanEntry>,
    logs: Vec<ContractLog>,
    sender: String,
}

impl ContractLedger {
    /// Deploy a fresh contract on a new host chain.
    pub fn deploy(deployer: &str) -> Result<Self> {
        Ok(Self {
            host: BlockLog::new(HOST_DIFFICULTY)?,
            medicines: HashMap::new(),
            batch_index: Vec::new(),
            receipts: Vec::new(),
            alerts: Vec::new(),
            scans: Vec::new(),
            logs: Vec::new(),
            sender: deployer.to_string(),
        })
    }

    /// Current host block number (the head's index).
    pub fn block_number(&self) -> u64 {
        self.host.head().index
    }

    pub fn logs(&self) -> &[ContractLog] {
        &self.logs
    }

    pub fn batch_count(&self) -> usize {
        self.batch_index.len()
    }

    /// Include one call in a freshly sealed host block.
    fn seal(
        &mut self,
        call: &str,
        batch_id: &str,
        kind: TransactionKind,
        input: serde_json::Value,
        to: Option<&str>,
    ) -> (Transaction, Block) {
        let mut receipt = Transaction::new(kind, input, &self.sender, to);
        let block = self
            .host
            .append(json!({
                "contract": CONTRACT_NAME,
                "call": call,
                "batch_id": batch_id,
                "sender": receipt.from,
                "tx_hash": receipt.hash,
                "input": receipt.payload,
            }))
            .clone();
        receipt.confirm(block.index);
        self.receipts.push(receipt.clone());
        debug!(call, batch_id, block_number = block.index, "call sealed");
        (receipt, block)
    }

    fn emit(&mut self, event: &str, batch_id: &str, data: serde_json::Value) {
        self.logs.push(ContractLog {
            block_number: self.block_number(),
            event: event.to_string(),
            batch_id: batch_id.to_string(),
            data,
        });
    }

    fn store_alert(
        &mut self,
        batch_id: &str,
        reason: String,
        severity: Severity,
        block_number: u64,
    ) -> Alert {
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            batch_id: batch_id.to_string(),
            reason,
            reported_by: self.sender.clone(),
            timestamp: util::now_utc_rfc3339(),
            severity,
            resolved: false,
            block_index: block_number,
        };
        self.alerts.push(alert.clone());
        self.emit(
            "CounterfeitAlert",
            batch_id,
            json!({ "reason": alert.reason, "severity": severity, "reporter": alert.reported_by }),
        );
        alert
    }

    fn report(&mut self, batch_id: &str, reason: &str, severity: Severity, call: &str) -> Alert {
        let input = json!({
            "batch_id": batch_id,
            "reason": reason,
            "severity": severity,
            "batch_known": self.medicines.contains_key(batch_id),
        });
        let (_, block) = self.seal(call, batch_id, TransactionKind::Alert, input, None);
        self.store_alert(batch_id, reason.to_string(), severity, block.index)
    }
}

impl AuthenticityLedger for ContractLedger {
    fn caller(&self) -> &str {
        &self.sender
    }

    fn set_caller(&mut self, caller: &str) {
        self.sender = caller.to_string();
    }

    fn register(&mut self, req: RegisterMedicine) -> Result<Committed> {
        // require(...) guards: revert before touching storage.
        ledger::validate_registration(&req)?;
        if self.medicines.contains_key(&req.batch_id) {
            return Err(LedgerError::DuplicateBatch(req.batch_id));
        }

        let input = ledger::registration_payload(&req);
        let (transaction, block) = self.seal(
            "registerMedicine",
            &req.batch_id,
            TransactionKind::Registration,
            input,
            None,
        );
        let genesis_checkpoint = Checkpoint {
            stage: SupplyStage::Manufactured,
            actor: if req.manufacturer_name.trim().is_empty() {
                req.manufacturer_id.clone()
            } else {
                req.manufacturer_name.clone()
            },
            location: "Manufacturing facility".to_string(),
            timestamp: block.timestamp.clone(),
            block_index: block.index,
        };
        let record = Medicine {
            batch_id: req.batch_id.clone(),
            name: req.name,
            manufacturer_id: req.manufacturer_id,
            manufacturer_name: req.manufacturer_name,
            manufacturing_date: req.manufacturing_date,
            expiry_date: req.expiry_date,
            details: req.details,
            status: MedicineStatus::Active,
            scan_count: 0,
            supply_chain: vec![genesis_checkpoint],
            verifications: Vec::new(),
            registered_at: block.timestamp.clone(),
            block_index: block.index,
            block_hash: block.hash.clone(),
        };
        self.medicines.insert(req.batch_id.clone(), record.clone());
        self.batch_index.push(req.batch_id.clone());
        self.emit(
            "MedicineRegistered",
            &req.batch_id,
            json!({ "name": record.name, "manufacturer": record.manufacturer_id }),
        );
        Ok(Committed {
            record,
            transaction,
            block,
        })
    }

    fn set_details(&mut self, batch_id: &str, details: MedicineDetails) -> Result<Medicine> {
        if !self.medicines.contains_key(batch_id) {
            return Err(LedgerError::BatchNotFound(batch_id.to_string()));
        }
        let input = json!({ "batch_id": batch_id, "details": details });
        self.seal("setMedicineDetails", batch_id, TransactionKind::Registration, input, None);

        let record = self.medicines.get_mut(batch_id).required_batch(batch_id)?;
        record.details = details;
        let record = record.clone();
        self.emit("DetailsUpdated", batch_id, json!({}));
        Ok(record)
    }

    fn verify(&mut self, batch_id: &str) -> VerificationOutcome {
        let eval = verification::evaluate(
            batch_id,
            self.medicines.get(batch_id),
            OffsetDateTime::now_utc(),
            self.host.len() as u64,
        );
        let known = self.medicines.contains_key(batch_id);
        let kind = if eval.is_authentic {
            TransactionKind::Verification
        } else {
            TransactionKind::Alert
        };
        let input = json!({
            "batch_id": batch_id,
            "is_authentic": eval.is_authentic,
            "checks": eval.checks,
        });
        let (receipt, block) = self.seal("verifyMedicine", batch_id, kind, input, None);

        let record = match self.medicines.get_mut(batch_id) {
            Some(m) => {
                m.scan_count += 1;
                m.verifications.push(VerificationRecord {
                    timestamp: block.timestamp.clone(),
                    is_authentic: eval.is_authentic,
                    verified_by: receipt.from.clone(),
                    block_index: block.index,
                });
                Some(m.clone())
            }
            None => None,
        };
        let verdict = if !known {
            ScanVerdict::Counterfeit
        } else if eval.is_authentic {
            ScanVerdict::Authentic
        } else {
            ScanVerdict::Suspicious
        };
        self.scans.push(ScanEntry {
            batch_id: batch_id.to_string(),
            verdict,
            scanned_by: receipt.from.clone(),
            timestamp: block.timestamp.clone(),
            block_index: block.index,
        });

        if !eval.is_authentic {
            let (reason, severity) = if known {
                ("verification checks failed".to_string(), Severity::High)
            } else {
                (format!("Batch {batch_id} not found on blockchain"), Severity::Critical)
            };
            warn!(batch_id, %reason, "verification failed on-chain");
            self.store_alert(batch_id, reason, severity, block.index);
        }
        self.emit(
            "MedicineVerified",
            batch_id,
            json!({
                "is_authentic": eval.is_authentic,
                "scan_count": record.as_ref().map(|m| m.scan_count),
            }),
        );

        VerificationOutcome {
            batch_id: batch_id.to_string(),
            is_authentic: eval.is_authentic,
            checks: eval.checks,
            record,
            timestamp: block.timestamp,
            block_index: block.index,
        }
    }

    fn transfer(
        &mut self,
        batch_id: &str,
        stage: SupplyStage,
        actor: &str,
        location: &str,
    ) -> Result<Committed> {
        if !self.medicines.contains_key(batch_id) {
            return Err(LedgerError::BatchNotFound(batch_id.to_string()));
        }
        let actor = if actor.trim().is_empty() {
            self.sender.clone()
        } else {
            actor.to_string()
        };
        let input = json!({
            "batch_id": batch_id,
            "stage": stage,
            "actor": actor,
            "location": location,
        });
        let (transaction, block) = self.seal(
            "addSupplyChainEntry",
            batch_id,
            TransactionKind::Transfer,
            input,
            Some(actor.as_str()),
        );
        let record = self.medicines.get_mut(batch_id).required_batch(batch_id)?;
        record.supply_chain.push(Checkpoint {
            stage: stage.clone(),
            actor,
            location: location.to_string(),
            timestamp: block.timestamp.clone(),
            block_index: block.index,
        });
        let record = record.clone();
        self.emit("SupplyChainUpdated", batch_id, json!({ "stage": stage }));
        Ok(Committed {
            record,
            transaction,
            block,
        })
    }

    fn mark_sold(&mut self, batch_id: &str) -> Result<Medicine> {
        if !self.medicines.contains_key(batch_id) {
            return Err(LedgerError::BatchNotFound(batch_id.to_string()));
        }
        let input = json!({ "batch_id": batch_id, "status": MedicineStatus::Sold });
        self.seal("markAsSold", batch_id, TransactionKind::Transfer, input, None);

        let record = self.medicines.get_mut(batch_id).required_batch(batch_id)?;
        record.status = MedicineStatus::Sold;
        let record = record.clone();
        self.emit("StatusChanged", batch_id, json!({ "status": MedicineStatus::Sold }));
        Ok(record)
    }

    fn flag_medicine(&mut self, batch_id: &str, reason: &str) -> Alert {
        let alert = self.report(batch_id, reason, Severity::High, "flagMedicine");
        if let Some(m) = self.medicines.get_mut(batch_id) {
            m.status = MedicineStatus::Flagged;
            self.emit("StatusChanged", batch_id, json!({ "status": MedicineStatus::Flagged }));
        }
        alert
    }

    fn create_alert(&mut self, batch_id: &str, reason: &str) -> Alert {
        self.report(batch_id, reason, Severity::Medium, "createAlert")
    }

    fn medicine(&self, batch_id: &str) -> Option<&Medicine> {
        self.medicines.get(batch_id)
    }

    fn medicines(&self) -> Vec<&Medicine> {
        let mut listed: Vec<&Medicine> = self
            .batch_index
            .iter()
            .filter_map(|id| self.medicines.get(id))
            .collect();
        listed.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        listed
    }

    fn blocks(&self) -> &[Block] {
        self.host.blocks()
    }

    fn verify_integrity(&self) -> bool {
        self.host.verify_integrity()
    }

    fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    fn transactions(&self) -> &[Transaction] {
        &self.receipts
    }

    fn scan_history(&self) -> &[ScanEntry] {
        &self.scans
    }
}

//! Compact, shareable proof of registration for one batch.
//!
//! A proof is small enough for a QR code: base64 of compact JSON.  A scanner
//! holding a proof can cross-check it against any ledger without receiving
//! the chain itself.

use serde::{Deserialize, Serialize};

use crate::error::{OptionExt as _, Result, ResultExt as _};
use crate::ledger::AuthenticityLedger;
use crate::model::Medicine;
use crate::util;

pub const PROOF_VERSION: u32 = 1;

/// Hex characters of the confirming block hash carried by a proof.
pub const HASH_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProof {
    pub v: u32,
    pub batch_id: String,
    pub name: String,
    pub manufacturer_id: String,
    pub block_index: u64,
    pub hash_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofCheck {
    pub valid: bool,
    pub mismatches: Vec<String>,
}

impl BatchProof {
    pub fn for_record(record: &Medicine) -> Self {
        Self {
            v: PROOF_VERSION,
            batch_id: record.batch_id.clone(),
            name: record.name.clone(),
            manufacturer_id: record.manufacturer_id.clone(),
            block_index: record.block_index,
            hash_prefix: record.block_hash.chars().take(HASH_PREFIX_LEN).collect(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).ctx_input("serialize proof")?;
        Ok(util::b64_encode(&json))
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = util::b64_decode(s.trim())?;
        let proof: Self = serde_json::from_slice(&bytes).ctx_input("parse proof")?;
        if proof.v != PROOF_VERSION {
            return Err(crate::error::LedgerError::InvalidInput(format!(
                "unsupported proof version {}",
                proof.v
            )));
        }
        Ok(proof)
    }

    /// Cross-check against `ledger`.  Every mismatch is reported, not just
    /// the first.
    pub fn check_against<L: AuthenticityLedger + ?Sized>(&self, ledger: &L) -> ProofCheck {
        let mut mismatches = Vec::new();
        match ledger.medicine(&self.batch_id) {
            None => mismatches.push(format!("batch {} not registered", self.batch_id)),
            Some(record) => {
                if record.name != self.name {
                    mismatches.push(format!("name '{}' != '{}'", self.name, record.name));
                }
                if record.manufacturer_id != self.manufacturer_id {
                    mismatches.push(format!(
                        "manufacturer '{}' != '{}'",
                        self.manufacturer_id, record.manufacturer_id
                    ));
                }
                if record.block_index != self.block_index {
                    mismatches.push(format!(
                        "block index {} != {}",
                        self.block_index, record.block_index
                    ));
                }
            }
        }
        match ledger.blocks().get(self.block_index as usize) {
            None => mismatches.push(format!("block #{} not in chain", self.block_index)),
            Some(block) => {
                if self.hash_prefix.is_empty() || !block.hash.starts_with(&self.hash_prefix) {
                    mismatches.push(format!(
                        "hash prefix {} does not match block #{}",
                        self.hash_prefix, self.block_index
                    ));
                }
            }
        }
        ProofCheck {
            valid: mismatches.is_empty(),
            mismatches,
        }
    }
}

/// Issue a proof for a registered batch.
pub fn issue<L: AuthenticityLedger + ?Sized>(ledger: &L, batch_id: &str) -> Result<BatchProof> {
    let record = ledger.medicine(batch_id).required_batch(batch_id)?;
    Ok(BatchProof::for_record(record))
}

//! Ledger records: medicines, checkpoints, transactions, alerts, scans.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util;

// ---------------------------------------------------------------------------
// Medicine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicineStatus {
    Active,
    Sold,
    Expired,
    Flagged,
}

impl fmt::Display for MedicineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Sold => "sold",
            Self::Expired => "expired",
            Self::Flagged => "flagged",
        };
        f.write_str(s)
    }
}

/// Custody stage of a supply-chain checkpoint.
///
/// Unknown stage names are kept verbatim in [`SupplyStage::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SupplyStage {
    Manufactured,
    QualityChecked,
    Shipped,
    InTransit,
    Delivered,
    Dispensed,
    Other(String),
}

impl fmt::Display for SupplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manufactured => f.write_str("Manufactured"),
            Self::QualityChecked => f.write_str("QualityChecked"),
            Self::Shipped => f.write_str("Shipped"),
            Self::InTransit => f.write_str("InTransit"),
            Self::Delivered => f.write_str("Delivered"),
            Self::Dispensed => f.write_str("Dispensed"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl FromStr for SupplyStage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        Ok(match key.as_str() {
            "manufactured" => Self::Manufactured,
            "qualitychecked" => Self::QualityChecked,
            "shipped" => Self::Shipped,
            "intransit" => Self::InTransit,
            "delivered" => Self::Delivered,
            "dispensed" => Self::Dispensed,
            _ => Self::Other(s.trim().to_string()),
        })
    }
}

impl From<String> for SupplyStage {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(stage) => stage,
            Err(never) => match never {},
        }
    }
}

impl From<SupplyStage> for String {
    fn from(stage: SupplyStage) -> Self {
        stage.to_string()
    }
}

/// Free-form descriptive fields, settable at registration or amended later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedicineDetails {
    #[serde(rename = "type")]
    pub medicine_type: String,
    pub quantity: String,
    pub composition: String,
    pub destination: String,
    pub price: String,
}

/// Caller input for a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMedicine {
    pub batch_id: String,
    pub name: String,
    pub manufacturer_id: String,
    pub manufacturer_name: String,
    pub manufacturing_date: String,
    pub expiry_date: String,
    #[serde(default)]
    pub details: MedicineDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: SupplyStage,
    pub actor: String,
    pub location: String,
    pub timestamp: String,
    /// Block that committed this checkpoint.
    pub block_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub timestamp: String,
    pub is_authentic: bool,
    pub verified_by: String,
    pub block_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub batch_id: String,
    pub name: String,
    pub manufacturer_id: String,
    pub manufacturer_name: String,
    pub manufacturing_date: String,
    pub expiry_date: String,
    pub details: MedicineDetails,
    pub status: MedicineStatus,
    pub scan_count: u64,
    pub supply_chain: Vec<Checkpoint>,
    pub verifications: Vec<VerificationRecord>,
    pub registered_at: String,
    /// Index of the block that confirmed the registration.
    pub block_index: u64,
    pub block_hash: String,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Registration,
    Verification,
    Transfer,
    Alert,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registration => "registration",
            Self::Verification => "verification",
            Self::Transfer => "transfer",
            Self::Alert => "alert",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
}

/// Logged record of one ledger operation, paired with the block confirming it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub payload: serde_json::Value,
    pub from: String,
    pub to: Option<String>,
    pub timestamp: String,
    pub hash: String,
    pub block_index: Option<u64>,
    pub status: TransactionStatus,
}

impl Transaction {
    /// Create and hash a pending transaction.
    pub fn new(
        kind: TransactionKind,
        payload: serde_json::Value,
        from: &str,
        to: Option<&str>,
    ) -> Self {
        let mut tx = Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            from: from.to_string(),
            to: to.map(str::to_string),
            timestamp: util::now_utc_rfc3339(),
            hash: String::new(),
            block_index: None,
            status: TransactionStatus::Pending,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    pub fn compute_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}",
            self.id,
            self.kind,
            util::canonical_json(&self.payload),
            self.timestamp
        );
        util::sha256_hex(preimage.as_bytes())
    }

    /// Back-fill the confirming block.
    pub fn confirm(&mut self, block_index: u64) {
        self.block_index = Some(block_index);
        self.status = TransactionStatus::Confirmed;
    }
}

// ---------------------------------------------------------------------------
// Alerts and scans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Suspected counterfeit.  The batch id may reference an unknown batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub batch_id: String,
    pub reason: String,
    pub reported_by: String,
    pub timestamp: String,
    pub severity: Severity,
    #[serde(default)]
    pub resolved: bool,
    pub block_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanVerdict {
    Authentic,
    /// Registered, but at least one gating check failed.
    Suspicious,
    /// Not registered at all.
    Counterfeit,
}

impl fmt::Display for ScanVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authentic => "authentic",
            Self::Suspicious => "suspicious",
            Self::Counterfeit => "counterfeit",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub batch_id: String,
    pub verdict: ScanVerdict,
    pub scanned_by: String,
    pub timestamp: String,
    pub block_index: u64,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

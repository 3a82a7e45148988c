//! The batch verification algorithm.
//!
//! Checks run in a fixed order.  Only a missing record stops evaluation;
//! otherwise every check is evaluated and the gating ones are aggregated
//! into the verdict.  "Supply chain present" is reported but never flips
//! the verdict on its own.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{Medicine, MedicineStatus};
use crate::util;

pub const CHECK_RECORD_EXISTS: &str = "Record exists";
pub const CHECK_BATCH_MATCHES: &str = "Batch number matches";
pub const CHECK_NOT_EXPIRED: &str = "Not expired";
pub const CHECK_NOT_SOLD: &str = "Not previously sold";
pub const CHECK_SUPPLY_CHAIN: &str = "Supply chain present";
pub const CHECK_CHAIN_INTEGRITY: &str = "Chain integrity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub checks: Vec<Check>,
    pub is_authentic: bool,
}

/// Result of one `verify` call, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub batch_id: String,
    pub is_authentic: bool,
    pub checks: Vec<Check>,
    pub record: Option<Medicine>,
    pub timestamp: String,
    /// Block that logged this verification attempt.
    pub block_index: u64,
}

impl VerificationOutcome {
    pub fn check(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Evaluate every check for `batch_id` against the current ledger state.
///
/// `chain_len` is the number of blocks in the chain at evaluation time.
pub fn evaluate(
    batch_id: &str,
    record: Option<&Medicine>,
    now: OffsetDateTime,
    chain_len: u64,
) -> Evaluation {
    let Some(record) = record else {
        return Evaluation {
            checks: vec![Check::new(
                CHECK_RECORD_EXISTS,
                false,
                format!("Batch {batch_id} not found on blockchain"),
            )],
            is_authentic: false,
        };
    };

    let mut checks = Vec::with_capacity(6);
    let mut is_authentic = true;

    checks.push(Check::new(
        CHECK_RECORD_EXISTS,
        true,
        format!("Registered by {}", record.manufacturer_name),
    ));

    checks.push(Check::new(
        CHECK_BATCH_MATCHES,
        record.batch_id == batch_id,
        format!("Batch number {} matches ledger record", record.batch_id),
    ));

    let expiry = match util::parse_timestamp(&record.expiry_date) {
        Ok(expiry) if now < expiry => {
            Check::new(CHECK_NOT_EXPIRED, true, format!("Valid until {}", record.expiry_date))
        }
        Ok(_) => Check::new(CHECK_NOT_EXPIRED, false, format!("Expired on {}", record.expiry_date)),
        Err(_) => Check::new(
            CHECK_NOT_EXPIRED,
            false,
            format!("Unreadable expiry date '{}'", record.expiry_date),
        ),
    };
    is_authentic &= expiry.passed;
    checks.push(expiry);

    let not_sold = if record.status == MedicineStatus::Sold {
        Check::new(CHECK_NOT_SOLD, false, "Batch already marked as sold")
    } else {
        Check::new(CHECK_NOT_SOLD, true, format!("Status: {}", record.status))
    };
    is_authentic &= not_sold.passed;
    checks.push(not_sold);

    // Advisory.
    let checkpoints = record.supply_chain.len();
    checks.push(Check::new(
        CHECK_SUPPLY_CHAIN,
        checkpoints > 0,
        format!("{checkpoints} checkpoints recorded"),
    ));

    let integrity = if record.block_index < chain_len {
        Check::new(
            CHECK_CHAIN_INTEGRITY,
            true,
            format!("Confirmed in block #{} of {chain_len}", record.block_index),
        )
    } else {
        Check::new(
            CHECK_CHAIN_INTEGRITY,
            false,
            format!(
                "Confirming block #{} outside chain of {chain_len} blocks",
                record.block_index
            ),
        )
    };
    is_authentic &= integrity.passed;
    checks.push(integrity);

    Evaluation {
        checks,
        is_authentic,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, MedicineDetails, SupplyStage};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-01-15 12:00 UTC);

    fn record(expiry: &str, status: MedicineStatus) -> Medicine {
        Medicine {
            batch_id: "B-001".into(),
            name: "Amoxicillin".into(),
            manufacturer_id: "MFG-1".into(),
            manufacturer_name: "Acme Pharma".into(),
            manufacturing_date: "2025-01-01".into(),
            expiry_date: expiry.into(),
            details: MedicineDetails::default(),
            status,
            scan_count: 0,
            supply_chain: vec![Checkpoint {
                stage: SupplyStage::Manufactured,
                actor: "Acme Pharma".into(),
                location: "Plant 1".into(),
                timestamp: "2025-01-01T00:00:00Z".into(),
                block_index: 1,
            }],
            verifications: vec![],
            registered_at: "2025-01-01T00:00:00Z".into(),
            block_index: 1,
            block_hash: "00ab".into(),
        }
    }

    #[test]
    fn missing_record_stops_after_first_check() {
        let eval = evaluate("GHOST", None, NOW, 5);
        assert!(!eval.is_authentic);
        assert_eq!(eval.checks.len(), 1);
        assert_eq!(eval.checks[0].name, CHECK_RECORD_EXISTS);
        assert!(eval.checks[0].detail.contains("not found"));
    }

    #[test]
    fn healthy_record_passes_all_six() {
        let r = record("2027-01-01", MedicineStatus::Active);
        let eval = evaluate("B-001", Some(&r), NOW, 2);
        assert!(eval.is_authentic);
        assert_eq!(eval.checks.len(), 6);
        assert!(eval.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn expired_and_sold_report_two_independent_failures() {
        let r = record("2025-06-01", MedicineStatus::Sold);
        let eval = evaluate("B-001", Some(&r), NOW, 2);
        assert!(!eval.is_authentic);
        assert_eq!(eval.checks.len(), 6);
        let failed: Vec<_> = eval
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(failed, vec![CHECK_NOT_EXPIRED, CHECK_NOT_SOLD]);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let r = record("2026-01-15T12:00:00Z", MedicineStatus::Active);
        let eval = evaluate("B-001", Some(&r), NOW, 2);
        assert!(!eval.is_authentic);
    }

    #[test]
    fn empty_supply_chain_is_advisory() {
        let mut r = record("2027-01-01", MedicineStatus::Active);
        r.supply_chain.clear();
        let eval = evaluate("B-001", Some(&r), NOW, 2);
        assert!(eval.is_authentic);
        let sc = eval.checks.iter().find(|c| c.name == CHECK_SUPPLY_CHAIN).unwrap();
        assert!(!sc.passed);
    }

    #[test]
    fn confirming_block_outside_chain_fails() {
        let mut r = record("2027-01-01", MedicineStatus::Active);
        r.block_index = 9;
        let eval = evaluate("B-001", Some(&r), NOW, 3);
        assert!(!eval.is_authentic);
        let ci = eval.checks.iter().find(|c| c.name == CHECK_CHAIN_INTEGRITY).unwrap();
        assert!(!ci.passed);
    }

    #[test]
    fn flagged_status_alone_does_not_gate() {
        let r = record("2027-01-01", MedicineStatus::Flagged);
        assert!(evaluate("B-001", Some(&r), NOW, 2).is_authentic);
    }

    #[test]
    fn unreadable_expiry_fails_closed() {
        let r = record("soon", MedicineStatus::Active);
        assert!(!evaluate("B-001", Some(&r), NOW, 2).is_authentic);
    }
}

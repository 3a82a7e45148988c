//! Read-only projections over ledger state.

use serde::{Deserialize, Serialize};

use crate::model::{Alert, Medicine, MedicineStatus, ScanEntry, ScanVerdict, Transaction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub medicines: usize,
    pub active: usize,
    pub sold: usize,
    pub flagged: usize,
    pub expired: usize,
    pub alerts: usize,
    pub open_alerts: usize,
    pub blocks: usize,
    pub transactions: usize,
    pub scans: usize,
    pub authentic_scans: usize,
    pub suspicious_scans: usize,
    pub counterfeit_scans: usize,
}

pub fn compute_stats<'a>(
    medicines: impl IntoIterator<Item = &'a Medicine>,
    alerts: &[Alert],
    blocks: usize,
    transactions: usize,
    scans: &[ScanEntry],
) -> Stats {
    let mut s = Stats {
        alerts: alerts.len(),
        open_alerts: alerts.iter().filter(|a| !a.resolved).count(),
        blocks,
        transactions,
        scans: scans.len(),
        ..Stats::default()
    };
    for m in medicines {
        s.medicines += 1;
        match m.status {
            MedicineStatus::Active => s.active += 1,
            MedicineStatus::Sold => s.sold += 1,
            MedicineStatus::Flagged => s.flagged += 1,
            MedicineStatus::Expired => s.expired += 1,
        }
    }
    for scan in scans {
        match scan.verdict {
            ScanVerdict::Authentic => s.authentic_scans += 1,
            ScanVerdict::Suspicious => s.suspicious_scans += 1,
            ScanVerdict::Counterfeit => s.counterfeit_scans += 1,
        }
    }
    s
}

/// The `n` most recent transactions, newest first.
pub fn recent_transactions(transactions: &[Transaction], n: usize) -> Vec<&Transaction> {
    transactions.iter().rev().take(n).collect()
}

/// Case-insensitive substring match over batch id, name and manufacturer.
/// A blank query matches nothing.
pub fn search<'a>(
    medicines: impl IntoIterator<Item = &'a Medicine>,
    query: &str,
) -> Vec<&'a Medicine> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    medicines
        .into_iter()
        .filter(|m| {
            [
                &m.batch_id,
                &m.name,
                &m.manufacturer_id,
                &m.manufacturer_name,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}

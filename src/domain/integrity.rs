use serde::{Deserialize, Serialize};

use super::Coins;

/// Raw counters gathered from the store for integrity verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub purchase_count: i64,
    pub transfer_count: i64,
    pub negative_balances: i64,
    pub dangling_purchases: i64,
    pub dangling_transfers: i64,
    pub invalid_amounts: i64,
    pub self_transfers: i64,
    /// Sum of all current balances
    pub circulating: Coins,
    /// Coins paid for purchases, at catalog price
    pub spent: Coins,
    /// Sum of all opening balances
    pub issued: Coins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: i64,
    pub purchase_count: i64,
    pub transfer_count: i64,
    pub circulating: Coins,
    pub spent: Coins,
    pub issued: Coins,
    /// circulating + spent == issued
    pub is_conserved: bool,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.is_conserved && self.issues.is_empty()
    }
}

pub fn build_integrity_report(stats: &IntegrityStats) -> IntegrityReport {
    let mut issues = Vec::new();

    if stats.negative_balances > 0 {
        issues.push(format!(
            "{} account(s) with a negative balance",
            stats.negative_balances
        ));
    }
    if stats.dangling_purchases > 0 {
        issues.push(format!(
            "{} purchase(s) referencing a missing account or product",
            stats.dangling_purchases
        ));
    }
    if stats.dangling_transfers > 0 {
        issues.push(format!(
            "{} transfer(s) referencing a missing account",
            stats.dangling_transfers
        ));
    }
    if stats.invalid_amounts > 0 {
        issues.push(format!(
            "{} record(s) with a non-positive amount or quantity",
            stats.invalid_amounts
        ));
    }
    if stats.self_transfers > 0 {
        issues.push(format!(
            "{} transfer(s) where sender equals receiver",
            stats.self_transfers
        ));
    }

    let is_conserved = stats.circulating + stats.spent == stats.issued;
    if !is_conserved {
        issues.push(format!(
            "coins not conserved: circulating {} + spent {} != issued {}",
            stats.circulating, stats.spent, stats.issued
        ));
    }

    IntegrityReport {
        account_count: stats.account_count,
        purchase_count: stats.purchase_count,
        transfer_count: stats.transfer_count,
        circulating: stats.circulating,
        spent: stats.spent,
        issued: stats.issued,
        is_conserved,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced_stats() -> IntegrityStats {
        IntegrityStats {
            account_count: 2,
            purchase_count: 1,
            transfer_count: 1,
            circulating: 1700,
            spent: 300,
            issued: 2000,
            ..Default::default()
        }
    }

    #[test]
    fn test_balanced_ledger_is_healthy() {
        let report = build_integrity_report(&balanced_stats());
        assert!(report.is_conserved);
        assert!(report.is_healthy());
    }

    #[test]
    fn test_lost_coins_are_reported() {
        let stats = IntegrityStats {
            circulating: 1600,
            ..balanced_stats()
        };
        let report = build_integrity_report(&stats);
        assert!(!report.is_conserved);
        assert!(!report.is_healthy());
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_negative_balance_is_reported() {
        let stats = IntegrityStats {
            negative_balances: 1,
            ..balanced_stats()
        };
        let report = build_integrity_report(&stats);
        assert!(report.is_conserved);
        assert!(!report.is_healthy());
    }
}

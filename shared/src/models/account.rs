//! Metal accounts and their append-only entry log

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;

/// Per-client, per-metal gram account.
///
/// The balance is never stored; it is always derived from the entry log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub metal: MetalKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Business meaning of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Operator-entered credit or debit
    ManualAdjustment,
    /// Client paid for a sale with metal from their account
    SalePayment,
    /// Currency deposit converted to grams at the day's sell price
    Deposit,
    /// Net grams credited when an analysis is approved for recovery
    RecoveryCredit,
    /// Claw-back of residue grams previously left on the books
    ResidueWriteOff,
    /// Compensating entry that reverses an earlier one
    Correction,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::ManualAdjustment => "manual_adjustment",
            EntryKind::SalePayment => "sale_payment",
            EntryKind::Deposit => "deposit",
            EntryKind::RecoveryCredit => "recovery_credit",
            EntryKind::ResidueWriteOff => "residue_write_off",
            EntryKind::Correction => "correction",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual_adjustment" => Some(EntryKind::ManualAdjustment),
            "sale_payment" => Some(EntryKind::SalePayment),
            "deposit" => Some(EntryKind::Deposit),
            "recovery_credit" => Some(EntryKind::RecoveryCredit),
            "residue_write_off" => Some(EntryKind::ResidueWriteOff),
            "correction" => Some(EntryKind::Correction),
            _ => None,
        }
    }
}

/// One immutable movement on a metal account.
///
/// Grams are signed: positive entries credit the account, negative
/// entries debit it. Entries are never updated or deleted; mistakes
/// are fixed with a compensating [`EntryKind::Correction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalAccountEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Business date of the movement
    pub entry_date: NaiveDate,
    pub grams: Decimal,
    pub kind: EntryKind,
    pub description: String,
    /// Free-form pointer to the document that caused this entry
    pub source_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derive an account balance from its full entry log
pub fn account_balance(entries: &[MetalAccountEntry]) -> Decimal {
    entries.iter().map(|e| e.grams).sum()
}

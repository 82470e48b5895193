//! Business logic services for the Metal Recovery Platform

pub mod analysis;
pub mod inventory;
pub mod ledger;
pub mod quotation;
pub mod recovery;
pub mod settlement;

pub use analysis::AnalysisService;
pub use inventory::InventoryService;
pub use ledger::LedgerService;
pub use quotation::QuotationService;
pub use recovery::RecoveryService;
pub use settlement::SettlementService;

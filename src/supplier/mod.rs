//! Supplier role: stock, pricing and fulfilment

pub mod engine;
pub mod ledger;

pub use engine::SupplierEngine;
pub use ledger::{drift_price, SupplierLedger};

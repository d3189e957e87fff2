//! Services module for receipt-service.

pub mod database;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod receipts;
pub mod reconciler;
pub mod store;

pub use database::MongoDb;
pub use locks::{AccountGuard, AccountLocks};
pub use memory::InMemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_error, record_failed_receipts, record_receipt_operation,
    record_reconciliation,
};
pub use receipts::{ListParams, ReceiptListing, ReceiptService, ReviewDecision, Viewer};
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler, ReconcilerConfig};
pub use store::{
    DateRange, Page, ReceiptQuery, ReceiptSort, ReceiptStore, SettingsStore, SortField,
    SortOrder, Stores, UserDirectory,
};

pub mod health;
pub mod receipts;

pub use health::{health_check, metrics_handler, readiness_check};
pub use receipts::{list_receipts, review_receipt, submit_receipt};

//! Domain models for receipt-service.

mod billing_period;
mod receipt;
mod setting;
mod user;

pub use billing_period::{BillingPeriod, CutoffType, GracePeriod, PeriodWindow};
pub use receipt::{Receipt, ReceiptHistory, ReceiptProof, ReceiptStatus};
pub use setting::Setting;
pub use user::User;

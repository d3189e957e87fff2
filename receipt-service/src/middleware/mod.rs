pub mod account;

pub use account::{ACCOUNT_ADMIN_HEADER, ACCOUNT_NUMBER_HEADER};

//! Storage contracts consumed by the reconciler and the receipt flows.

use crate::models::{PeriodWindow, Receipt, ReceiptHistory, ReceiptStatus, Setting, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use std::str::FromStr;
use std::sync::Arc;

/// Date bounds on `receipt_date`. Unset bounds are open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRange {
    pub gte: Option<DateTime<Utc>>,
    pub lte: Option<DateTime<Utc>>,
    pub lt: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.gte.map_or(true, |b| instant >= b)
            && self.lte.map_or(true, |b| instant <= b)
            && self.lt.map_or(true, |b| instant < b)
    }
}

/// Receipt filter. Every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct ReceiptQuery {
    pub user_ref: Option<String>,
    pub status_in: Vec<ReceiptStatus>,
    pub status_not_in: Vec<ReceiptStatus>,
    pub receipt_date: Option<DateRange>,
    /// Receipts standing for this period: a matching period key, or no key and
    /// a `receipt_date` inside the window.
    pub period: Option<PeriodWindow>,
    /// Case-insensitive substring match on the payment reference.
    pub reference_number: Option<String>,
}

impl ReceiptQuery {
    pub fn for_user(user_ref: impl Into<String>) -> Self {
        Self {
            user_ref: Some(user_ref.into()),
            ..Default::default()
        }
    }

    pub fn with_status_in(mut self, statuses: &[ReceiptStatus]) -> Self {
        self.status_in = statuses.to_vec();
        self
    }

    pub fn with_status_not_in(mut self, statuses: &[ReceiptStatus]) -> Self {
        self.status_not_in = statuses.to_vec();
        self
    }

    pub fn with_receipt_date(mut self, range: DateRange) -> Self {
        self.receipt_date = Some(range);
        self
    }

    pub fn with_period(mut self, window: PeriodWindow) -> Self {
        self.period = Some(window);
        self
    }

    pub fn matches(&self, receipt: &Receipt) -> bool {
        if let Some(user_ref) = &self.user_ref {
            if &receipt.user_ref != user_ref {
                return false;
            }
        }
        if !self.status_in.is_empty() && !self.status_in.contains(&receipt.status) {
            return false;
        }
        if self.status_not_in.contains(&receipt.status) {
            return false;
        }
        if let Some(range) = &self.receipt_date {
            if !range.contains(receipt.receipt_date) {
                return false;
            }
        }
        if let Some(window) = &self.period {
            let in_period = match &receipt.period_key {
                Some(key) => key == &window.key,
                None => window.contains(receipt.receipt_date),
            };
            if !in_period {
                return false;
            }
        }
        if let Some(search) = &self.reference_number {
            let needle = search.to_lowercase();
            match &receipt.reference_number {
                Some(reference) if reference.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    ReceiptDate,
    Status,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::ReceiptDate => "receipt_date",
            SortField::Status => "status",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" | "createdAt" => Ok(SortField::CreatedAt),
            "updated_at" | "updatedAt" => Ok(SortField::UpdatedAt),
            "receipt_date" | "receiptDate" => Ok(SortField::ReceiptDate),
            "status" => Ok(SortField::Status),
            _ => Err(format!("Invalid sort field: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "1" => Ok(SortOrder::Asc),
            "desc" | "-1" => Ok(SortOrder::Desc),
            _ => Err(format!("Invalid sort order: {}", s)),
        }
    }
}

/// Primary sort key. Ties fall back to `receipt_date` descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiptSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl ReceiptSort {
    pub fn newest_first() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: i64,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_account(&self, account_number: &str) -> Result<Option<User>, AppError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Setting>, AppError>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn find_one(
        &self,
        query: &ReceiptQuery,
        sort: ReceiptSort,
    ) -> Result<Option<Receipt>, AppError>;

    async fn find(
        &self,
        query: &ReceiptQuery,
        page: Page,
        sort: ReceiptSort,
    ) -> Result<Vec<Receipt>, AppError>;

    async fn count(&self, query: &ReceiptQuery) -> Result<u64, AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Receipt>, AppError>;

    async fn create(&self, receipt: &Receipt) -> Result<(), AppError>;

    /// Inserts `receipt` unless the user already has a FAILED receipt for the
    /// window, matched by period key or, for rows without a key, by
    /// `receipt_date` within the bounds.
    /// Returns whether a row was written. Must be atomic.
    async fn insert_failed_if_absent(
        &self,
        receipt: &Receipt,
        window: &PeriodWindow,
    ) -> Result<bool, AppError>;

    /// Moves a receipt from `from` to `to`. Returns `None` when the receipt
    /// does not exist or is not currently in `from`.
    async fn transition_status(
        &self,
        id: &str,
        from: ReceiptStatus,
        to: ReceiptStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, AppError>;

    async fn append_history(&self, entry: &ReceiptHistory) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// The three collaborators the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub receipts: Arc<dyn ReceiptStore>,
    pub users: Arc<dyn UserDirectory>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    /// Uses one backend for all three collaborators.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ReceiptStore + UserDirectory + SettingsStore + 'static,
    {
        Self {
            receipts: backend.clone(),
            users: backend.clone(),
            settings: backend,
        }
    }
}

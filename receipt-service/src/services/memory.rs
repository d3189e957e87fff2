//! Process-local store with the same filter semantics as the MongoDB store.
//! Used by tests and by local runs without a database.

use crate::models::{PeriodWindow, Receipt, ReceiptHistory, ReceiptStatus, Setting, User};
use crate::services::store::{
    Page, ReceiptQuery, ReceiptSort, ReceiptStore, SettingsStore, SortField,
    SortOrder, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    receipts: RwLock<Vec<Receipt>>,
    history: RwLock<Vec<ReceiptHistory>>,
    users: RwLock<HashMap<String, User>>,
    settings: RwLock<HashMap<String, Setting>>,
    reject_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.users
            .write()
            .await
            .insert(user.account_number.clone(), user);
    }

    pub async fn put_setting(&self, setting: Setting) {
        self.settings
            .write()
            .await
            .insert(setting.id.clone(), setting);
    }

    pub async fn remove_setting(&self, id: &str) {
        self.settings.write().await.remove(id);
    }

    /// Inserts a receipt without any checks, as a legacy import would.
    pub async fn seed_receipt(&self, receipt: Receipt) {
        self.receipts.write().await.push(receipt);
    }

    pub async fn all_receipts(&self) -> Vec<Receipt> {
        self.receipts.read().await.clone()
    }

    pub async fn all_history(&self) -> Vec<ReceiptHistory> {
        self.history.read().await.clone()
    }

    /// Makes every write fail with a database error until reset.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, AtomicOrdering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.reject_writes.load(AtomicOrdering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "in-memory store is rejecting writes"
            )));
        }
        Ok(())
    }
}

fn compare(a: &Receipt, b: &Receipt, sort: ReceiptSort) -> Ordering {
    let primary = match sort.field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::ReceiptDate => a.receipt_date.cmp(&b.receipt_date),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
    };
    let primary = match sort.order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary.then_with(|| b.receipt_date.cmp(&a.receipt_date))
}

fn sorted_matches(receipts: &[Receipt], query: &ReceiptQuery, sort: ReceiptSort) -> Vec<Receipt> {
    let mut matches: Vec<Receipt> = receipts
        .iter()
        .filter(|r| query.matches(r))
        .cloned()
        .collect();
    matches.sort_by(|a, b| compare(a, b, sort));
    matches
}

#[async_trait]
impl ReceiptStore for InMemoryStore {
    async fn find_one(
        &self,
        query: &ReceiptQuery,
        sort: ReceiptSort,
    ) -> Result<Option<Receipt>, AppError> {
        let receipts = self.receipts.read().await;
        Ok(sorted_matches(&receipts, query, sort).into_iter().next())
    }

    async fn find(
        &self,
        query: &ReceiptQuery,
        page: Page,
        sort: ReceiptSort,
    ) -> Result<Vec<Receipt>, AppError> {
        let receipts = self.receipts.read().await;
        let limit = usize::try_from(page.limit).unwrap_or(0);
        Ok(sorted_matches(&receipts, query, sort)
            .into_iter()
            .skip(page.skip as usize)
            .take(limit)
            .collect())
    }

    async fn count(&self, query: &ReceiptQuery) -> Result<u64, AppError> {
        let receipts = self.receipts.read().await;
        Ok(receipts.iter().filter(|r| query.matches(r)).count() as u64)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Receipt>, AppError> {
        let receipts = self.receipts.read().await;
        Ok(receipts.iter().find(|r| r.id == id).cloned())
    }

    async fn create(&self, receipt: &Receipt) -> Result<(), AppError> {
        self.check_writable()?;
        self.receipts.write().await.push(receipt.clone());
        Ok(())
    }

    async fn insert_failed_if_absent(
        &self,
        receipt: &Receipt,
        window: &PeriodWindow,
    ) -> Result<bool, AppError> {
        self.check_writable()?;
        // Check and insert under one write lock.
        let mut receipts = self.receipts.write().await;
        let query = ReceiptQuery::for_user(receipt.user_ref.clone())
            .with_status_in(&[ReceiptStatus::Failed])
            .with_period(window.clone());
        let exists = receipts.iter().any(|r| query.matches(r));
        if exists {
            return Ok(false);
        }
        receipts.push(receipt.clone());
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: ReceiptStatus,
        to: ReceiptStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, AppError> {
        self.check_writable()?;
        let mut receipts = self.receipts.write().await;
        match receipts.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(receipt) => {
                receipt.status = to;
                receipt.updated_at = now;
                Ok(Some(receipt.clone()))
            }
            None => Ok(None),
        }
    }

    async fn append_history(&self, entry: &ReceiptHistory) -> Result<(), AppError> {
        self.check_writable()?;
        self.history.write().await.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_by_account(&self, account_number: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(account_number).cloned())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Setting>, AppError> {
        Ok(self.settings.read().await.get(id).cloned())
    }
}

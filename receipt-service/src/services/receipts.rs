//! Receipt lookups and the submit, review and list flows.

use crate::models::{
    BillingPeriod, CutoffType, Receipt, ReceiptHistory, ReceiptProof, ReceiptStatus, User,
};
use crate::services::locks::AccountLocks;
use crate::services::metrics::{record_error, record_receipt_operation};
use crate::services::reconciler::{ReconcileError, Reconciler, ReconcilerConfig};
use crate::services::store::{Page, ReceiptQuery, ReceiptSort, ReceiptStore, Stores};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use service_core::error::AppError;
use std::sync::Arc;

/// Most recent receipt for `user_ref` that can serve as a reconciliation
/// baseline. DENIED receipts never count.
pub async fn latest_receipt(
    receipts: &dyn ReceiptStore,
    user_ref: &str,
    exclude_failed: bool,
) -> Result<Option<Receipt>, AppError> {
    let excluded: &[ReceiptStatus] = if exclude_failed {
        &[ReceiptStatus::Denied, ReceiptStatus::Failed]
    } else {
        &[ReceiptStatus::Denied]
    };
    let query = ReceiptQuery::for_user(user_ref).with_status_not_in(excluded);
    receipts.find_one(&query, ReceiptSort::newest_first()).await
}

/// Who is asking, as asserted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub account_number: String,
    pub admin: bool,
}

#[derive(Debug, Clone)]
pub struct ListParams {
    pub page: u64,
    pub limit: i64,
    pub sort: ReceiptSort,
    pub search: Option<String>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort: ReceiptSort::newest_first(),
            search: None,
        }
    }
}

impl ListParams {
    fn page(&self) -> Result<Page, AppError> {
        if self.page < 1 {
            return Err(AppError::BadRequest(anyhow::anyhow!("page must be >= 1")));
        }
        if !(1..=100).contains(&self.limit) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "limit must be between 1 and 100"
            )));
        }
        Ok(Page {
            skip: (self.page - 1).saturating_mul(self.limit as u64),
            limit: self.limit,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReceiptListing {
    pub receipts: Vec<Receipt>,
    pub total: u64,
    pub page: u64,
    pub limit: i64,
    pub current_receipt: Option<Receipt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewDecision {
    Accepted,
    Denied,
}

impl ReviewDecision {
    pub fn status(&self) -> ReceiptStatus {
        match self {
            ReviewDecision::Accepted => ReceiptStatus::Accepted,
            ReviewDecision::Denied => ReceiptStatus::Denied,
        }
    }
}

pub struct ReceiptService {
    stores: Stores,
    reconciler: Arc<Reconciler>,
    locks: Arc<AccountLocks>,
}

impl ReceiptService {
    pub fn new(stores: Stores, config: ReconcilerConfig) -> Self {
        let locks = Arc::new(AccountLocks::new());
        let reconciler = Arc::new(Reconciler::with_locks(stores.clone(), config, locks.clone()));
        Self {
            stores,
            reconciler,
            locks,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn latest_receipt(&self, user_ref: &str) -> Result<Option<Receipt>, AppError> {
        latest_receipt(
            self.stores.receipts.as_ref(),
            user_ref,
            self.reconciler.config().exclude_failed_from_baseline,
        )
        .await
    }

    /// Latest receipt that is pending or accepted.
    pub async fn latest_paid_receipt(&self, user_ref: &str) -> Result<Option<Receipt>, AppError> {
        latest_receipt(self.stores.receipts.as_ref(), user_ref, true).await
    }

    /// Period a new submission pays for: the one after the latest paid
    /// receipt, or the current one when nothing has been paid yet.
    pub async fn next_receipt_period(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<BillingPeriod, AppError> {
        let cutoff = cutoff_of(user)?;
        let grace = self.reconciler.grace_period().await;
        let period = match self.latest_paid_receipt(&user.id).await? {
            Some(receipt) => receipt.period(cutoff, grace).next(),
            None => BillingPeriod::containing(now, cutoff, grace),
        };
        Ok(period)
    }

    /// Pending or accepted receipt covering the period that contains `now`.
    pub async fn current_receipt(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, AppError> {
        let cutoff = cutoff_of(user)?;
        let grace = self.reconciler.grace_period().await;
        let window = BillingPeriod::containing(now, cutoff, grace).window(grace);
        let query = ReceiptQuery::for_user(&user.id)
            .with_status_not_in(&[ReceiptStatus::Denied, ReceiptStatus::Failed])
            .with_period(window);
        self.stores
            .receipts
            .find_one(&query, ReceiptSort::newest_first())
            .await
    }

    /// The receipt list. Account holders are reconciled first; a failed
    /// reconciliation is logged and does not fail the read.
    #[tracing::instrument(skip_all, fields(account_number = %viewer.account_number, admin = viewer.admin))]
    pub async fn list_for_viewer(
        &self,
        viewer: &Viewer,
        params: &ListParams,
        now: DateTime<Utc>,
    ) -> Result<ReceiptListing, AppError> {
        let page = params.page()?;
        record_receipt_operation("list");

        let (mut query, current_receipt) = if viewer.admin {
            let query = ReceiptQuery::default().with_status_not_in(&[ReceiptStatus::Failed]);
            (query, None)
        } else {
            let user = self.find_user(&viewer.account_number).await?;

            if let Err(e) = self.reconciler.reconcile(&user.account_number, now).await {
                tracing::warn!(error = %e, "Reconciliation failed, listing without it");
                record_error(e.outcome(), "list_receipts");
            }

            let current = match self.current_receipt(&user, now).await {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(error = %e, "Current receipt lookup failed");
                    None
                }
            };
            (ReceiptQuery::for_user(&user.id), current)
        };
        query.reference_number = params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let receipts = self.stores.receipts.find(&query, page, params.sort).await?;
        let total = self.stores.receipts.count(&query).await?;

        Ok(ReceiptListing {
            receipts,
            total,
            page: params.page,
            limit: params.limit,
            current_receipt,
        })
    }

    /// Records a PENDING receipt for the next unpaid period.
    #[tracing::instrument(skip_all, fields(account_number = %account_number))]
    pub async fn submit(
        &self,
        account_number: &str,
        proof: ReceiptProof,
        now: DateTime<Utc>,
    ) -> Result<Receipt, AppError> {
        let user = self.find_user(account_number).await?;
        cutoff_of(&user)?;

        let _guard = self.locks.acquire(account_number).await;
        let grace = self.reconciler.grace_period().await;
        let period = self.next_receipt_period(&user, now).await?;

        let receipt = Receipt::new_pending(
            user.id.clone(),
            user.plan_ref.clone(),
            &period,
            grace,
            proof,
            now,
        );
        self.stores.receipts.create(&receipt).await?;
        record_receipt_operation("submit");

        tracing::info!(
            receipt_id = %receipt.id,
            period = %period.key(),
            "Receipt submitted"
        );
        Ok(receipt)
    }

    /// Accepts or denies a PENDING receipt and records who did it.
    #[tracing::instrument(skip_all, fields(receipt_id = %receipt_id, reviewer = %reviewer))]
    pub async fn review(
        &self,
        receipt_id: &str,
        decision: ReviewDecision,
        reason: Option<String>,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<Receipt, AppError> {
        let to = decision.status();
        let existing = self
            .stores
            .receipts
            .find_by_id(receipt_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Receipt not found")))?;

        if !existing.status.can_transition_to(to) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Receipt is {} and cannot be marked {}",
                existing.status,
                to
            )));
        }

        let updated = self
            .stores
            .receipts
            .transition_status(receipt_id, existing.status, to, now)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Receipt was reviewed concurrently"))
            })?;

        let entry = ReceiptHistory::new(
            receipt_id.to_string(),
            to,
            reason,
            reviewer.to_string(),
            now,
        );
        self.stores.receipts.append_history(&entry).await?;
        record_receipt_operation(match decision {
            ReviewDecision::Accepted => "accept",
            ReviewDecision::Denied => "deny",
        });

        tracing::info!(status = %to, "Receipt reviewed");
        Ok(updated)
    }

    async fn find_user(&self, account_number: &str) -> Result<User, AppError> {
        self.stores
            .users
            .find_by_account(account_number)
            .await?
            .ok_or_else(|| {
                AppError::from(ReconcileError::UserNotFound(account_number.to_string()))
            })
    }
}

fn cutoff_of(user: &User) -> Result<CutoffType, AppError> {
    user.cutoff_type()
        .map_err(|_| ReconcileError::UnknownCutoffType(user.cutoff.clone()).into())
}

//! Missed-period reconciliation.
//!
//! Compares the latest receipt a user has against the most recently closed
//! billing period and backfills one synthetic FAILED receipt for every period
//! in between. Safe to run on every read: a period that already has a FAILED
//! receipt is skipped.

use crate::models::{BillingPeriod, CutoffType, GracePeriod, Receipt};
use crate::services::locks::AccountLocks;
use crate::services::metrics::{record_error, record_failed_receipts, record_reconciliation};
use crate::services::receipts::latest_receipt;
use crate::services::store::Stores;
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Unknown cutoff type: {0:?}")]
    UnknownCutoffType(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] AppError),

    #[error("Setting missing or invalid: {0}")]
    SettingsMissing(String),
}

impl ReconcileError {
    /// Label used for the reconciliation outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            ReconcileError::UnknownCutoffType(_) => "unknown_cutoff",
            ReconcileError::UserNotFound(_) => "user_not_found",
            ReconcileError::StoreUnavailable(_) => "store_unavailable",
            ReconcileError::SettingsMissing(_) => "settings_missing",
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::UnknownCutoffType(value) => {
                AppError::BadRequest(anyhow::anyhow!("Unknown cutoff type: {:?}", value))
            }
            ReconcileError::UserNotFound(account) => {
                AppError::NotFound(anyhow::anyhow!("User not found: {}", account))
            }
            ReconcileError::StoreUnavailable(e) => e,
            ReconcileError::SettingsMissing(id) => {
                AppError::InternalError(anyhow::anyhow!("Setting missing or invalid: {}", id))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Settings entry holding the grace period in days.
    pub grace_setting_id: String,
    /// Whether FAILED receipts are ignored when locating the latest receipt.
    pub exclude_failed_from_baseline: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            grace_setting_id: "grace_period".to_string(),
            exclude_failed_from_baseline: true,
        }
    }
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub account_number: String,
    pub cutoff: CutoffType,
    pub grace_days: u32,
    pub baseline: String,
    pub last_closed: String,
    /// Period keys that received a new FAILED receipt.
    pub created: Vec<String>,
    /// Missed periods that already had a FAILED receipt.
    pub already_covered: u32,
}

pub struct Reconciler {
    stores: Stores,
    config: ReconcilerConfig,
    locks: Arc<AccountLocks>,
}

impl Reconciler {
    pub fn new(stores: Stores, config: ReconcilerConfig) -> Self {
        Self::with_locks(stores, config, Arc::new(AccountLocks::new()))
    }

    pub fn with_locks(stores: Stores, config: ReconcilerConfig, locks: Arc<AccountLocks>) -> Self {
        Self {
            stores,
            config,
            locks,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    #[tracing::instrument(skip_all, fields(account_number = %account_number))]
    pub async fn reconcile(
        &self,
        account_number: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let result = self.run(account_number, now).await;
        match &result {
            Ok(report) => {
                record_reconciliation("ok");
                if !report.created.is_empty() {
                    record_failed_receipts(report.cutoff.as_str(), report.created.len() as u64);
                }
            }
            Err(e) => {
                record_reconciliation(e.outcome());
                record_error(e.outcome(), "reconcile");
            }
        }
        result
    }

    async fn run(
        &self,
        account_number: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let user = self
            .stores
            .users
            .find_by_account(account_number)
            .await?
            .ok_or_else(|| ReconcileError::UserNotFound(account_number.to_string()))?;
        let cutoff = user
            .cutoff_type()
            .map_err(|_| ReconcileError::UnknownCutoffType(user.cutoff.clone()))?;

        let _guard = self.locks.acquire(account_number).await;

        let grace = self.grace_period().await;
        let last_closed = BillingPeriod::containing(now, cutoff, grace).previous();

        let latest = latest_receipt(
            self.stores.receipts.as_ref(),
            &user.id,
            self.config.exclude_failed_from_baseline,
        )
        .await?;
        // Without any receipt the enrollment period counts as paid.
        let baseline = match &latest {
            Some(receipt) => receipt.period(cutoff, grace),
            None => BillingPeriod::containing(user.created_at, cutoff, grace),
        };

        let missed = baseline.periods_until(&last_closed).max(0);
        tracing::debug!(
            baseline = %baseline,
            last_closed = %last_closed,
            missed = missed,
            grace_days = grace.days(),
            "Reconciling billing periods"
        );

        let mut created = Vec::new();
        let mut already_covered = 0;
        for offset in 1..=missed {
            let period = baseline.advance(offset);
            let window = period.window(grace);
            let receipt =
                Receipt::new_failed(user.id.clone(), user.plan_ref.clone(), &period, grace, now);

            if self
                .stores
                .receipts
                .insert_failed_if_absent(&receipt, &window)
                .await?
            {
                tracing::info!(
                    period = %window.key,
                    receipt_id = %receipt.id,
                    receipt_date = %receipt.receipt_date,
                    "Created FAILED receipt for missed period"
                );
                created.push(window.key);
            } else {
                already_covered += 1;
            }
        }

        Ok(ReconcileReport {
            account_number: account_number.to_string(),
            cutoff,
            grace_days: grace.days(),
            baseline: baseline.key(),
            last_closed: last_closed.key(),
            created,
            already_covered,
        })
    }

    /// Grace period from the settings store, or zero when it cannot be read.
    pub async fn grace_period(&self) -> GracePeriod {
        match self.load_grace_period().await {
            Ok(grace) => grace,
            Err(e) => {
                tracing::warn!(
                    setting_id = %self.config.grace_setting_id,
                    error = %e,
                    "Grace period unavailable, using zero days"
                );
                record_error(e.outcome(), "grace_period");
                GracePeriod::default()
            }
        }
    }

    async fn load_grace_period(&self) -> Result<GracePeriod, ReconcileError> {
        let id = &self.config.grace_setting_id;
        let value = self
            .stores
            .settings
            .find_by_id(id)
            .await?
            .filter(|setting| setting.active)
            .and_then(|setting| setting.value)
            .ok_or_else(|| ReconcileError::SettingsMissing(id.clone()))?;

        value
            .parse::<GracePeriod>()
            .map_err(|e| ReconcileError::SettingsMissing(format!("{}: {}", id, e)))
    }
}

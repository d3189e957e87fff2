//! Test helper module for receipt-service integration tests.
//!
//! Stores are in-memory so every test gets an isolated, fully seeded world.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use receipt_service::config::ReceiptConfig;
use receipt_service::models::{
    BillingPeriod, CutoffType, GracePeriod, Receipt, ReceiptProof, ReceiptStatus, Setting, User,
};
use receipt_service::services::{
    InMemoryStore, ReceiptService, Reconciler, ReconcilerConfig, Stores,
};
use receipt_service::startup::Application;
use std::sync::Arc;
use uuid::Uuid;

pub const GRACE_SETTING_ID: &str = "grace_period";

/// UTC instant at the given minute.
pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Last millisecond of the given day, the end instant of a zero-grace period.
pub fn end_of_day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 23, 59, 59).unwrap() + Duration::milliseconds(999)
}

pub fn user(account_number: &str, cutoff: &str, enrolled: DateTime<Utc>) -> User {
    User {
        id: format!("user-{}", account_number),
        account_number: account_number.to_string(),
        cutoff: cutoff.to_string(),
        plan_ref: Some("plan-basic".to_string()),
        subd_ref: Some("subd-1".to_string()),
        admin: false,
        created_at: enrolled,
    }
}

/// A receipt as a legacy import would have left it: dated, with no period key.
pub fn receipt(
    user: &User,
    status: ReceiptStatus,
    receipt_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Receipt {
    let cutoff = user.cutoff.parse().unwrap_or(CutoffType::End);
    let period = BillingPeriod::containing(receipt_date, cutoff, GracePeriod::default());
    let mut receipt = Receipt::new_pending(
        user.id.clone(),
        user.plan_ref.clone(),
        &period,
        GracePeriod::default(),
        ReceiptProof {
            reference_type: Some("GCASH".to_string()),
            reference_number: Some(format!("REF-{}", Uuid::new_v4().simple())),
            receipt_name: Some("receipt.jpg".to_string()),
            image_id: None,
        },
        created_at,
    );
    receipt.status = status;
    receipt.receipt_date = receipt_date;
    receipt.period_key = None;
    receipt
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub stores: Stores,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let stores = Stores::from_backend(store.clone());
        Self { store, stores }
    }

    pub async fn with_user(user: User) -> Self {
        let fixture = Self::new();
        fixture.store.insert_user(user).await;
        fixture
    }

    pub async fn set_grace(&self, value: &str) {
        self.store
            .put_setting(Setting::new(GRACE_SETTING_ID, value))
            .await;
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.stores.clone(), ReconcilerConfig::default())
    }

    pub fn reconciler_with(&self, config: ReconcilerConfig) -> Reconciler {
        Reconciler::new(self.stores.clone(), config)
    }

    pub fn service(&self) -> ReceiptService {
        ReceiptService::new(self.stores.clone(), ReconcilerConfig::default())
    }

    pub async fn failed_receipts(&self, user_ref: &str) -> Vec<Receipt> {
        let mut failed: Vec<Receipt> = self
            .store
            .all_receipts()
            .await
            .into_iter()
            .filter(|r| r.user_ref == user_ref && r.status == ReceiptStatus::Failed)
            .collect();
        failed.sort_by_key(|r| r.receipt_date);
        failed
    }
}

/// Test application wrapper for HTTP tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    /// Spawn a new test application on a random port over an empty store.
    pub async fn spawn() -> Self {
        let fixture = Fixture::new();
        let app = Application::build_with_stores(ReceiptConfig::for_tests(), fixture.stores)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store: fixture.store,
        }
    }
}

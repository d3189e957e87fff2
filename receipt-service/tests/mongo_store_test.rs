//! MongoDB store tests. Require a running MongoDB:
//! `TEST_MONGODB_URI=mongodb://localhost:27017 cargo test -- --ignored`

mod common;

use common::{at, end_of_day, receipt, user};
use receipt_service::models::{BillingPeriod, CutoffType, GracePeriod, Receipt, ReceiptStatus};
use receipt_service::services::{
    MongoDb, ReceiptQuery, ReceiptSort, ReceiptStore, UserDirectory,
};
use std::sync::Arc;
use uuid::Uuid;

async fn connect() -> MongoDb {
    let uri = std::env::var("TEST_MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let database = format!("receipt_test_{}", Uuid::new_v4().simple());
    let db = MongoDb::connect(&uri, &database)
        .await
        .expect("Failed to connect to test MongoDB");
    db.initialize_indexes()
        .await
        .expect("Failed to create indexes");
    db
}

async fn cleanup(db: &MongoDb) {
    db.database().drop(None).await.ok();
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn failed_insert_is_atomic_under_concurrency() {
    let db = Arc::new(connect().await);
    let period = BillingPeriod::containing_date(
        chrono::NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        CutoffType::End,
    );
    let grace = GracePeriod::default();
    let window = period.window(grace);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let window = window.clone();
        let candidate = Receipt::new_failed(
            "user-1".to_string(),
            None,
            &period,
            grace,
            at(2024, 4, 20, 12, 0),
        );
        handles.push(tokio::spawn(async move {
            db.insert_failed_if_absent(&candidate, &window).await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);

    let query = ReceiptQuery::for_user("user-1").with_status_in(&[ReceiptStatus::Failed]);
    assert_eq!(db.count(&query).await.unwrap(), 1);

    cleanup(&db).await;
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn legacy_failed_row_in_window_blocks_insert() {
    let db = connect().await;
    let holder = user("ACC-1", "END", at(2024, 1, 10, 0, 0));
    let legacy = receipt(
        &holder,
        ReceiptStatus::Failed,
        at(2024, 2, 20, 0, 0),
        at(2024, 2, 21, 0, 0),
    );
    db.create(&legacy).await.unwrap();

    let period = BillingPeriod::containing_date(
        chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        CutoffType::End,
    );
    let candidate = Receipt::new_failed(
        holder.id.clone(),
        None,
        &period,
        GracePeriod::default(),
        at(2024, 4, 20, 12, 0),
    );
    let inserted = db
        .insert_failed_if_absent(&candidate, &period.window(GracePeriod::default()))
        .await
        .unwrap();

    assert!(!inserted);
    cleanup(&db).await;
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn keyed_failed_row_only_covers_its_own_period() {
    let db = connect().await;
    let holder = user("ACC-1", "END", at(2024, 1, 10, 0, 0));
    let march = BillingPeriod::containing_date(
        chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        CutoffType::End,
    );
    // Written under five days of grace, so dated 5 April.
    let existing = Receipt::new_failed(
        holder.id.clone(),
        None,
        &march,
        GracePeriod::new(5),
        at(2024, 4, 20, 12, 0),
    );
    db.create(&existing).await.unwrap();

    let april = march.next();
    let candidate = Receipt::new_failed(
        holder.id.clone(),
        None,
        &april,
        GracePeriod::default(),
        at(2024, 5, 20, 12, 0),
    );
    let inserted = db
        .insert_failed_if_absent(&candidate, &april.window(GracePeriod::default()))
        .await
        .unwrap();

    assert!(inserted);
    cleanup(&db).await;
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn finds_latest_receipt_and_transitions_status() {
    let db = connect().await;
    let holder = user("ACC-1", "END", at(2024, 1, 10, 0, 0));
    db.users().insert_one(&holder, None).await.unwrap();

    let older = receipt(
        &holder,
        ReceiptStatus::Accepted,
        end_of_day(2024, 2, 29),
        at(2024, 2, 1, 0, 0),
    );
    let newer = receipt(
        &holder,
        ReceiptStatus::Pending,
        end_of_day(2024, 3, 31),
        at(2024, 3, 1, 0, 0),
    );
    db.create(&older).await.unwrap();
    db.create(&newer).await.unwrap();

    let found = db.find_by_account("ACC-1").await.unwrap();
    assert_eq!(found.map(|u| u.id), Some(holder.id.clone()));

    let latest = db
        .find_one(
            &ReceiptQuery::for_user(&holder.id).with_status_not_in(&[ReceiptStatus::Denied]),
            ReceiptSort::newest_first(),
        )
        .await
        .unwrap();
    assert_eq!(latest.map(|r| r.id), Some(newer.id.clone()));

    let moved = db
        .transition_status(
            &newer.id,
            ReceiptStatus::Pending,
            ReceiptStatus::Accepted,
            at(2024, 3, 2, 0, 0),
        )
        .await
        .unwrap();
    assert_eq!(moved.map(|r| r.status), Some(ReceiptStatus::Accepted));

    let stale = db
        .transition_status(
            &newer.id,
            ReceiptStatus::Pending,
            ReceiptStatus::Denied,
            at(2024, 3, 2, 0, 0),
        )
        .await
        .unwrap();
    assert!(stale.is_none());

    cleanup(&db).await;
}

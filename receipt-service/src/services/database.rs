//! MongoDB-backed stores for receipt-service.

use crate::models::{PeriodWindow, Receipt, ReceiptHistory, ReceiptStatus, Setting, User};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    Page, ReceiptQuery, ReceiptSort, ReceiptStore, SettingsStore, SortField, UserDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{
        FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
        UpdateOptions,
    },
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use tracing::{info, instrument};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for receipt-service");

        let receipts = self.receipts();

        // Latest-receipt lookups per user
        let user_created_index = IndexModel::builder()
            .keys(doc! { "user_ref": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_created_idx".to_string())
                    .build(),
            )
            .build();

        receipts
            .create_index(user_created_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create user_created index: {}", e);
                AppError::from(e)
            })?;

        // Period range checks
        let user_status_date_index = IndexModel::builder()
            .keys(doc! { "user_ref": 1, "status": 1, "receipt_date": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_status_date_idx".to_string())
                    .build(),
            )
            .build();

        receipts
            .create_index(user_status_date_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create user_status_date index: {}", e);
                AppError::from(e)
            })?;

        // Staff listing filters on status
        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_idx".to_string())
                    .build(),
            )
            .build();

        receipts.create_index(status_index, None).await.map_err(|e| {
            tracing::error!("Failed to create status index: {}", e);
            AppError::from(e)
        })?;

        // One synthetic FAILED receipt per user and period
        let failed_period_index = IndexModel::builder()
            .keys(doc! { "user_ref": 1, "period_key": 1 })
            .options(
                IndexOptions::builder()
                    .name("failed_period_unique_idx".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! {
                        "status": ReceiptStatus::Failed.as_str(),
                        "period_key": { "$exists": true },
                    })
                    .build(),
            )
            .build();

        receipts
            .create_index(failed_period_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create failed_period unique index: {}", e);
                AppError::from(e)
            })?;

        let account_index = IndexModel::builder()
            .keys(doc! { "account_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_number_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.users()
            .create_index(account_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create account_number index: {}", e);
                AppError::from(e)
            })?;

        let history_index = IndexModel::builder()
            .keys(doc! { "receipt_ref": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("receipt_ref_idx".to_string())
                    .build(),
            )
            .build();

        self.receipt_history()
            .create_index(history_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create receipt_ref index: {}", e);
                AppError::from(e)
            })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub fn receipts(&self) -> Collection<Receipt> {
        self.db.collection("receipts")
    }

    pub fn receipt_history(&self) -> Collection<ReceiptHistory> {
        self.db.collection("receipt_history")
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn settings(&self) -> Collection<Setting> {
        self.db.collection("settings")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Translates a receipt query into a MongoDB filter document.
pub fn receipt_filter(query: &ReceiptQuery) -> Document {
    let mut filter = doc! {};

    if let Some(user_ref) = &query.user_ref {
        filter.insert("user_ref", user_ref.as_str());
    }

    let mut status = doc! {};
    if !query.status_in.is_empty() {
        status.insert("$in", status_values(&query.status_in));
    }
    if !query.status_not_in.is_empty() {
        status.insert("$nin", status_values(&query.status_not_in));
    }
    if !status.is_empty() {
        filter.insert("status", status);
    }

    if let Some(range) = &query.receipt_date {
        let mut bounds = doc! {};
        if let Some(gte) = range.gte {
            bounds.insert("$gte", BsonDateTime::from_chrono(gte));
        }
        if let Some(lte) = range.lte {
            bounds.insert("$lte", BsonDateTime::from_chrono(lte));
        }
        if let Some(lt) = range.lt {
            bounds.insert("$lt", BsonDateTime::from_chrono(lt));
        }
        if !bounds.is_empty() {
            filter.insert("receipt_date", bounds);
        }
    }

    if let Some(window) = &query.period {
        filter.insert(
            "$or",
            vec![
                doc! { "period_key": window.key.as_str() },
                doc! {
                    "period_key": { "$exists": false },
                    "receipt_date": {
                        "$gte": BsonDateTime::from_chrono(window.start),
                        "$lte": BsonDateTime::from_chrono(window.end),
                    },
                },
            ],
        );
    }

    if let Some(search) = &query.reference_number {
        filter.insert(
            "reference_number",
            doc! { "$regex": escape_regex(search), "$options": "i" },
        );
    }

    filter
}

pub fn receipt_sort(sort: ReceiptSort) -> Document {
    let mut document = Document::new();
    document.insert(sort.field.as_str(), sort.order.as_i32());
    if sort.field != SortField::ReceiptDate {
        document.insert("receipt_date", -1);
    }
    document
}

fn status_values(statuses: &[ReceiptStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl ReceiptStore for MongoDb {
    #[instrument(skip(self, query))]
    async fn find_one(
        &self,
        query: &ReceiptQuery,
        sort: ReceiptSort,
    ) -> Result<Option<Receipt>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_one_receipt"])
            .start_timer();

        let options = FindOneOptions::builder().sort(receipt_sort(sort)).build();
        let receipt = self
            .receipts()
            .find_one(receipt_filter(query), options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find receipt: {}", e);
                AppError::from(e)
            })?;

        timer.observe_duration();
        Ok(receipt)
    }

    #[instrument(skip(self, query))]
    async fn find(
        &self,
        query: &ReceiptQuery,
        page: Page,
        sort: ReceiptSort,
    ) -> Result<Vec<Receipt>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_receipts"])
            .start_timer();

        let options = FindOptions::builder()
            .sort(receipt_sort(sort))
            .skip(page.skip)
            .limit(page.limit)
            .build();

        let cursor = self
            .receipts()
            .find(receipt_filter(query), options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list receipts: {}", e);
                AppError::from(e)
            })?;

        let receipts: Vec<Receipt> = cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect receipts: {}", e);
            AppError::from(e)
        })?;

        timer.observe_duration();
        Ok(receipts)
    }

    async fn count(&self, query: &ReceiptQuery) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_receipts"])
            .start_timer();

        let total = self
            .receipts()
            .count_documents(receipt_filter(query), None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to count receipts: {}", e);
                AppError::from(e)
            })?;

        timer.observe_duration();
        Ok(total)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Receipt>, AppError> {
        self.receipts()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find receipt {}: {}", id, e);
                AppError::from(e)
            })
    }

    #[instrument(skip(self, receipt), fields(receipt_id = %receipt.id))]
    async fn create(&self, receipt: &Receipt) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_receipt"])
            .start_timer();

        self.receipts()
            .insert_one(receipt, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert receipt: {}", e);
                AppError::from(e)
            })?;

        timer.observe_duration();
        info!(status = %receipt.status, "Receipt created");
        Ok(())
    }

    #[instrument(skip(self, receipt, window), fields(period = %window.key))]
    async fn insert_failed_if_absent(
        &self,
        receipt: &Receipt,
        window: &PeriodWindow,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_failed_receipt"])
            .start_timer();

        let filter = doc! {
            "user_ref": receipt.user_ref.as_str(),
            "status": ReceiptStatus::Failed.as_str(),
            "$or": [
                { "period_key": window.key.as_str() },
                {
                    "period_key": { "$exists": false },
                    "receipt_date": {
                        "$gte": BsonDateTime::from_chrono(window.start),
                        "$lte": BsonDateTime::from_chrono(window.end),
                    }
                },
            ],
        };
        let document = mongodb::bson::to_document(receipt).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize receipt: {}", e))
        })?;
        let update = doc! { "$setOnInsert": document };
        let options = UpdateOptions::builder().upsert(true).build();

        let inserted = match self.receipts().update_one(filter, update, options).await {
            Ok(result) => result.upserted_id.is_some(),
            // A concurrent run inserted the same period first.
            Err(e) if is_duplicate_key(&e) => {
                tracing::debug!("FAILED receipt already inserted by a concurrent run");
                false
            }
            Err(e) => {
                tracing::error!("Failed to upsert FAILED receipt: {}", e);
                return Err(AppError::from(e));
            }
        };

        timer.observe_duration();
        Ok(inserted)
    }

    #[instrument(skip(self, now))]
    async fn transition_status(
        &self,
        id: &str,
        from: ReceiptStatus,
        to: ReceiptStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_receipt_status"])
            .start_timer();

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .receipts()
            .find_one_and_update(
                doc! { "_id": id, "status": from.as_str() },
                doc! {
                    "$set": {
                        "status": to.as_str(),
                        "updated_at": BsonDateTime::from_chrono(now),
                    }
                },
                options,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to update receipt status: {}", e);
                AppError::from(e)
            })?;

        timer.observe_duration();
        Ok(updated)
    }

    async fn append_history(&self, entry: &ReceiptHistory) -> Result<(), AppError> {
        self.receipt_history()
            .insert_one(entry, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert receipt history: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MongoDb {
    #[instrument(skip(self))]
    async fn find_by_account(&self, account_number: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user"])
            .start_timer();

        let user = self
            .users()
            .find_one(doc! { "account_number": account_number }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find user: {}", e);
                AppError::from(e)
            })?;

        timer.observe_duration();
        Ok(user)
    }
}

#[async_trait]
impl SettingsStore for MongoDb {
    async fn find_by_id(&self, id: &str) -> Result<Option<Setting>, AppError> {
        self.settings()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find setting {}: {}", id, e);
                AppError::from(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{DateRange, SortOrder};
    use chrono::TimeZone;

    #[test]
    fn builds_status_and_range_filter() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let query = ReceiptQuery::for_user("u1")
            .with_status_not_in(&[ReceiptStatus::Denied, ReceiptStatus::Failed])
            .with_receipt_date(DateRange {
                gte: Some(start),
                lte: None,
                lt: Some(end),
            });

        let filter = receipt_filter(&query);
        assert_eq!(filter.get_str("user_ref").unwrap(), "u1");

        let status = filter.get_document("status").unwrap();
        let nin = status.get_array("$nin").unwrap();
        assert_eq!(nin.len(), 2);
        assert!(!status.contains_key("$in"));

        let range = filter.get_document("receipt_date").unwrap();
        assert!(range.contains_key("$gte"));
        assert!(range.contains_key("$lt"));
        assert!(!range.contains_key("$lte"));
    }

    #[test]
    fn period_filter_prefers_key_over_legacy_window() {
        let period = crate::models::BillingPeriod::containing_date(
            chrono::NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            crate::models::CutoffType::End,
        );
        let window = period.window(crate::models::GracePeriod::default());
        let filter = receipt_filter(&ReceiptQuery::for_user("u1").with_period(window));

        let branches = filter.get_array("$or").unwrap();
        assert_eq!(branches.len(), 2);
        let keyed = branches[0].as_document().unwrap();
        assert_eq!(keyed.get_str("period_key").unwrap(), "END:2024-03");
        let legacy = branches[1].as_document().unwrap();
        assert!(legacy.contains_key("receipt_date"));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(receipt_filter(&ReceiptQuery::default()).is_empty());
    }

    #[test]
    fn reference_search_is_escaped() {
        let query = ReceiptQuery {
            reference_number: Some("A.1+".to_string()),
            ..Default::default()
        };
        let filter = receipt_filter(&query);
        let regex = filter.get_document("reference_number").unwrap();
        assert_eq!(regex.get_str("$regex").unwrap(), "A\\.1\\+");
        assert_eq!(regex.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn sort_breaks_ties_on_receipt_date() {
        let sort = receipt_sort(ReceiptSort::newest_first());
        let keys: Vec<&str> = sort.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["created_at", "receipt_date"]);

        let by_date = receipt_sort(ReceiptSort {
            field: SortField::ReceiptDate,
            order: SortOrder::Asc,
        });
        assert_eq!(by_date.len(), 1);
        assert_eq!(by_date.get_i32("receipt_date").unwrap(), 1);
    }
}

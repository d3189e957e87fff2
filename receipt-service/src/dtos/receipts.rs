use crate::models::{CutoffType, Receipt, ReceiptProof, ReceiptStatus};
use crate::services::{ListParams, ReceiptListing, ReceiptSort, ReviewDecision, SortField, SortOrder};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub id: String,
    pub user_ref: String,
    pub plan_ref: Option<String>,
    pub reference_type: Option<String>,
    pub reference_number: Option<String>,
    pub receipt_name: Option<String>,
    pub image_id: Option<String>,
    pub receipt_date: String,
    pub cutoff: CutoffType,
    pub status: ReceiptStatus,
    pub period_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Receipt> for ReceiptResponse {
    fn from(receipt: Receipt) -> Self {
        Self {
            id: receipt.id,
            user_ref: receipt.user_ref,
            plan_ref: receipt.plan_ref,
            reference_type: receipt.reference_type,
            reference_number: receipt.reference_number,
            receipt_name: receipt.receipt_name,
            image_id: receipt.image_id,
            receipt_date: receipt.receipt_date.to_rfc3339(),
            cutoff: receipt.cutoff,
            status: receipt.status,
            period_key: receipt.period_key,
            created_at: receipt.created_at.to_rfc3339(),
            updated_at: receipt.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListReceiptsParams {
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<u64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    #[validate(length(max = 100, message = "search is too long"))]
    pub search: Option<String>,
}

impl TryFrom<ListReceiptsParams> for ListParams {
    type Error = AppError;

    fn try_from(params: ListReceiptsParams) -> Result<Self, Self::Error> {
        params.validate()?;

        let field = match params.sort_by.as_deref() {
            Some(s) => s
                .parse::<SortField>()
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
            None => SortField::default(),
        };
        let order = match params.sort_order.as_deref() {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
            None => SortOrder::default(),
        };

        let defaults = ListParams::default();
        Ok(ListParams {
            page: params.page.unwrap_or(defaults.page),
            limit: params.limit.unwrap_or(defaults.limit),
            sort: ReceiptSort { field, order },
            search: params.search,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptListResponse {
    pub receipts: Vec<ReceiptResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: i64,
    pub total_pages: u64,
    pub current_receipt: Option<ReceiptResponse>,
}

impl From<ReceiptListing> for ReceiptListResponse {
    fn from(listing: ReceiptListing) -> Self {
        let limit = listing.limit.max(1) as u64;
        Self {
            receipts: listing.receipts.into_iter().map(ReceiptResponse::from).collect(),
            total: listing.total,
            page: listing.page,
            limit: listing.limit,
            total_pages: listing.total.div_ceil(limit),
            current_receipt: listing.current_receipt.map(ReceiptResponse::from),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitReceiptRequest {
    #[validate(length(min = 1, max = 50, message = "reference_type must be 1-50 characters"))]
    pub reference_type: Option<String>,
    #[validate(length(min = 1, max = 100, message = "reference_number cannot be empty"))]
    pub reference_number: String,
    #[validate(length(max = 255, message = "receipt_name is too long"))]
    pub receipt_name: Option<String>,
    pub image_id: Option<String>,
}

impl From<SubmitReceiptRequest> for ReceiptProof {
    fn from(request: SubmitReceiptRequest) -> Self {
        ReceiptProof {
            reference_type: request.reference_type,
            reference_number: Some(request.reference_number.trim().to_string()),
            receipt_name: request.receipt_name,
            image_id: request.image_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewReceiptRequest {
    pub decision: ReviewDecision,
    #[validate(length(max = 500, message = "reason is too long"))]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: Option<u64>, limit: Option<i64>) -> ListReceiptsParams {
        ListReceiptsParams {
            page,
            limit,
            sort_by: None,
            sort_order: None,
            search: None,
        }
    }

    #[test]
    fn list_params_default_to_first_page_newest_first() {
        let list = ListParams::try_from(params(None, None)).unwrap();
        assert_eq!(list.page, 1);
        assert_eq!(list.limit, 20);
        assert_eq!(list.sort, ReceiptSort::newest_first());
    }

    #[test]
    fn list_params_reject_out_of_range_paging() {
        assert!(matches!(
            ListParams::try_from(params(Some(0), None)),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            ListParams::try_from(params(None, Some(101))),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn list_params_parse_sort_aliases() {
        let mut p = params(Some(2), Some(10));
        p.sort_by = Some("receiptDate".to_string());
        p.sort_order = Some("asc".to_string());
        let list = ListParams::try_from(p).unwrap();
        assert_eq!(list.sort.field, SortField::ReceiptDate);
        assert_eq!(list.sort.order, SortOrder::Asc);

        let mut bad = params(None, None);
        bad.sort_by = Some("amount".to_string());
        assert!(matches!(
            ListParams::try_from(bad),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn total_pages_rounds_up() {
        let listing = ReceiptListing {
            receipts: vec![],
            total: 41,
            page: 1,
            limit: 20,
            current_receipt: None,
        };
        assert_eq!(ReceiptListResponse::from(listing).total_pages, 3);
    }
}

use crate::dtos::{
    ListReceiptsParams, ReceiptListResponse, ReceiptResponse, ReviewReceiptRequest,
    SubmitReceiptRequest,
};
use crate::services::{record_error, ListParams, Viewer};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

/// Lists receipts for the caller. Account holders are reconciled first.
#[tracing::instrument(skip(state, params))]
pub async fn list_receipts(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(params): Query<ListReceiptsParams>,
) -> Result<Json<ReceiptListResponse>, AppError> {
    let params = ListParams::try_from(params)?;

    let listing = state
        .service
        .list_for_viewer(&viewer, &params, Utc::now())
        .await
        .inspect_err(|e| record_error(e.kind(), "list_receipts"))?;

    Ok(Json(ReceiptListResponse::from(listing)))
}

#[tracing::instrument(skip(state, request))]
pub async fn submit_receipt(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(request): Json<SubmitReceiptRequest>,
) -> Result<(StatusCode, Json<ReceiptResponse>), AppError> {
    request.validate()?;

    if viewer.admin {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Staff accounts cannot submit receipts"
        )));
    }

    let receipt = state
        .service
        .submit(&viewer.account_number, request.into(), Utc::now())
        .await
        .inspect_err(|e| record_error(e.kind(), "submit_receipt"))?;

    Ok((StatusCode::CREATED, Json(ReceiptResponse::from(receipt))))
}

#[tracing::instrument(skip(state, request))]
pub async fn review_receipt(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(receipt_id): Path<String>,
    Json(request): Json<ReviewReceiptRequest>,
) -> Result<Json<ReceiptResponse>, AppError> {
    request.validate()?;

    if !viewer.admin {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Only staff can review receipts"
        )));
    }

    let receipt = state
        .service
        .review(
            &receipt_id,
            request.decision,
            request.reason,
            &viewer.account_number,
            Utc::now(),
        )
        .await
        .inspect_err(|e| record_error(e.kind(), "review_receipt"))?;

    Ok(Json(ReceiptResponse::from(receipt)))
}

use crate::services::Viewer;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const ACCOUNT_NUMBER_HEADER: &str = "X-Account-Number";
pub const ACCOUNT_ADMIN_HEADER: &str = "X-Account-Admin";

/// Viewer extractor for receipt-service
///
/// The gateway authenticates the caller and forwards the account number in
/// `X-Account-Number`; staff sessions additionally carry `X-Account-Admin: true`.
/// Both headers are trusted as-is.
#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let account_number = parts
            .headers
            .get(ACCOUNT_NUMBER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing {} header (required from gateway)",
                    ACCOUNT_NUMBER_HEADER
                ))
            })?;

        let admin = parts
            .headers
            .get(ACCOUNT_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        tracing::Span::current().record("account_number", account_number);

        Ok(Viewer {
            account_number: account_number.to_string(),
            admin,
        })
    }
}

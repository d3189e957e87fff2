//! Account holder model, as read from the user directory.

use super::billing_period::CutoffType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User record. Only the fields receipts depend on are mapped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub account_number: String,
    /// Raw value; validated when a billing schedule is needed.
    #[serde(default)]
    pub cutoff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subd_ref: Option<String>,
    #[serde(default)]
    pub admin: bool,
    /// Enrollment date.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn cutoff_type(&self) -> Result<CutoffType, String> {
        self.cutoff.parse()
    }
}

//! Receipt model.

use super::billing_period::{BillingPeriod, CutoffType, GracePeriod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Receipt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiptStatus {
    Pending,
    Accepted,
    Denied,
    Failed,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "PENDING",
            ReceiptStatus::Accepted => "ACCEPTED",
            ReceiptStatus::Denied => "DENIED",
            ReceiptStatus::Failed => "FAILED",
        }
    }

    /// Whether staff may move a receipt from `self` to `to`.
    pub fn can_transition_to(&self, to: ReceiptStatus) -> bool {
        matches!(
            (self, to),
            (ReceiptStatus::Pending, ReceiptStatus::Accepted)
                | (ReceiptStatus::Pending, ReceiptStatus::Denied)
        )
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(ReceiptStatus::Pending),
            "ACCEPTED" => Ok(ReceiptStatus::Accepted),
            "DENIED" => Ok(ReceiptStatus::Denied),
            "FAILED" => Ok(ReceiptStatus::Failed),
            _ => Err(format!("Invalid receipt status: {}", s)),
        }
    }
}

/// One payment submission, real or synthetic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// The billing period this receipt pays for, not the submission time.
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub receipt_date: DateTime<Utc>,
    pub cutoff: CutoffType,
    pub status: ReceiptStatus,
    /// Key of the billing period paid or missed. Absent on legacy rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_key: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Proof-of-payment metadata supplied by the account holder.
#[derive(Debug, Clone, Default)]
pub struct ReceiptProof {
    pub reference_type: Option<String>,
    pub reference_number: Option<String>,
    pub receipt_name: Option<String>,
    pub image_id: Option<String>,
}

impl Receipt {
    /// A user submission for `period`, awaiting staff review.
    pub fn new_pending(
        user_ref: String,
        plan_ref: Option<String>,
        period: &BillingPeriod,
        grace: GracePeriod,
        proof: ReceiptProof,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_ref,
            plan_ref,
            reference_type: proof.reference_type,
            reference_number: proof.reference_number,
            receipt_name: proof.receipt_name,
            image_id: proof.image_id,
            receipt_date: period.end_instant(grace),
            cutoff: period.cutoff(),
            status: ReceiptStatus::Pending,
            period_key: Some(period.key()),
            created_at: now,
            updated_at: now,
        }
    }

    /// A placeholder marking a missed period, dated at the period's end instant.
    pub fn new_failed(
        user_ref: String,
        plan_ref: Option<String>,
        period: &BillingPeriod,
        grace: GracePeriod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_ref,
            plan_ref,
            reference_type: None,
            reference_number: None,
            receipt_name: None,
            image_id: None,
            receipt_date: period.end_instant(grace),
            cutoff: period.cutoff(),
            status: ReceiptStatus::Failed,
            period_key: Some(period.key()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.status == ReceiptStatus::Failed && self.period_key.is_some()
    }

    /// The billing period this receipt stands for on a `cutoff` schedule.
    ///
    /// Uses the stored period key so later grace changes do not move the
    /// receipt into another period. Rows without a usable key fall back to
    /// locating `receipt_date` under `grace`.
    pub fn period(&self, cutoff: CutoffType, grace: GracePeriod) -> BillingPeriod {
        self.period_key
            .as_deref()
            .and_then(BillingPeriod::from_key)
            .filter(|period| period.cutoff() == cutoff)
            .unwrap_or_else(|| BillingPeriod::containing(self.receipt_date, cutoff, grace))
    }
}

/// Audit entry written on every staff review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptHistory {
    #[serde(rename = "_id")]
    pub id: String,
    pub receipt_ref: String,
    pub action: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub actor: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ReceiptHistory {
    pub fn new(
        receipt_ref: String,
        action: ReceiptStatus,
        description: Option<String>,
        actor: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            receipt_ref,
            action,
            description,
            actor,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn only_pending_receipts_can_be_reviewed() {
        assert!(ReceiptStatus::Pending.can_transition_to(ReceiptStatus::Accepted));
        assert!(ReceiptStatus::Pending.can_transition_to(ReceiptStatus::Denied));
        assert!(!ReceiptStatus::Pending.can_transition_to(ReceiptStatus::Failed));
        assert!(!ReceiptStatus::Accepted.can_transition_to(ReceiptStatus::Denied));
        assert!(!ReceiptStatus::Failed.can_transition_to(ReceiptStatus::Accepted));
        assert!(!ReceiptStatus::Denied.can_transition_to(ReceiptStatus::Accepted));
    }

    #[test]
    fn failed_receipt_is_dated_at_period_end() {
        let period = BillingPeriod::containing_date(
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            CutoffType::End,
        );
        let now = Utc.with_ymd_and_hms(2024, 4, 20, 0, 0, 0).unwrap();
        let receipt = Receipt::new_failed("u1".into(), None, &period, GracePeriod::new(2), now);

        assert_eq!(receipt.status, ReceiptStatus::Failed);
        assert_eq!(receipt.receipt_date, period.end_instant(GracePeriod::new(2)));
        assert_eq!(receipt.period_key.as_deref(), Some("END:2024-03"));
        assert!(receipt.reference_number.is_none());
        assert!(receipt.is_synthetic());
    }

    #[test]
    fn pending_receipt_keeps_its_period_across_grace_changes() {
        let period = BillingPeriod::containing_date(
            NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            CutoffType::End,
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        let receipt = Receipt::new_pending(
            "u1".into(),
            None,
            &period,
            GracePeriod::new(5),
            ReceiptProof::default(),
            now,
        );

        assert_eq!(receipt.period_key.as_deref(), Some("END:2024-01"));
        assert!(!receipt.is_synthetic());
        assert_eq!(receipt.period(CutoffType::End, GracePeriod::default()), period);

        let mut legacy = receipt.clone();
        legacy.period_key = None;
        assert_eq!(
            legacy.period(CutoffType::End, GracePeriod::default()).key(),
            "END:2024-02"
        );
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&ReceiptStatus::Accepted).unwrap();
        assert_eq!(json, "\"ACCEPTED\"");
        assert_eq!("denied".parse::<ReceiptStatus>().unwrap(), ReceiptStatus::Denied);
    }
}

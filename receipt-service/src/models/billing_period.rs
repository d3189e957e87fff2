//! Billing period model.
//!
//! A period is identified by its anchor day: the 15th of a month for `MID`
//! cutoffs, the last calendar day of a month for `END` cutoffs. The period
//! closes at the end of its anchor day, pushed later by the grace period.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Billing cycle anchor chosen by the account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CutoffType {
    Mid,
    End,
}

impl CutoffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutoffType::Mid => "MID",
            CutoffType::End => "END",
        }
    }
}

impl fmt::Display for CutoffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CutoffType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MID" => Ok(CutoffType::Mid),
            "END" => Ok(CutoffType::End),
            _ => Err(format!("Unknown cutoff type: {:?}", s)),
        }
    }
}

/// Extra whole days appended to every period end before it counts as closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GracePeriod {
    days: u32,
}

impl GracePeriod {
    /// Longest grace accepted from settings. A period must close before the
    /// next one does.
    pub const MAX_DAYS: u32 = 28;

    /// Values above [`GracePeriod::MAX_DAYS`] are clamped.
    pub fn new(days: u32) -> Self {
        Self {
            days: days.min(Self::MAX_DAYS),
        }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.days))
    }
}

impl FromStr for GracePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let days = s
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("Invalid grace period {:?}: {}", s, e))?;
        if days > Self::MAX_DAYS {
            return Err(format!(
                "Grace period {} exceeds {} days",
                days,
                Self::MAX_DAYS
            ));
        }
        Ok(GracePeriod::new(days))
    }
}

/// Inclusive instant bounds of one billing period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodWindow {
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// One billing period for a given cutoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BillingPeriod {
    cutoff: CutoffType,
    end: NaiveDate,
}

impl BillingPeriod {
    /// The period a calendar date belongs to, ignoring grace.
    pub fn containing_date(date: NaiveDate, cutoff: CutoffType) -> Self {
        let first = date - Days::new(u64::from(date.day0()));
        let end = match cutoff {
            CutoffType::End => first + Months::new(1) - Days::new(1),
            CutoffType::Mid if date.day() <= 15 => first + Days::new(14),
            CutoffType::Mid => first + Months::new(1) + Days::new(14),
        };
        Self { cutoff, end }
    }

    /// The first period whose grace-adjusted end instant is at or after `instant`.
    pub fn containing(instant: DateTime<Utc>, cutoff: CutoffType, grace: GracePeriod) -> Self {
        let shifted = instant
            .checked_sub_signed(grace.duration())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::containing_date(shifted.date_naive(), cutoff)
    }

    /// Parses a key produced by [`BillingPeriod::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let (cutoff, month) = key.split_once(':')?;
        let cutoff = cutoff.parse::<CutoffType>().ok()?;
        let first = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").ok()?;
        let anchor = match cutoff {
            CutoffType::Mid => first + Days::new(14),
            CutoffType::End => first,
        };
        Some(Self::containing_date(anchor, cutoff))
    }

    pub fn cutoff(&self) -> CutoffType {
        self.cutoff
    }

    /// Anchor day: the 15th or the last day of the month.
    pub fn end_date(&self) -> NaiveDate {
        self.end
    }

    /// Moves `n` periods forward (or backward when negative).
    pub fn advance(&self, n: i32) -> Self {
        let months = Months::new(n.unsigned_abs());
        let end = match self.cutoff {
            CutoffType::Mid if n >= 0 => self.end + months,
            CutoffType::Mid => self.end - months,
            // Step from the first of the following month so the anchor stays on
            // the last calendar day regardless of month length.
            CutoffType::End => {
                let first_of_next = self.end + Days::new(1);
                let shifted = if n >= 0 {
                    first_of_next + months
                } else {
                    first_of_next - months
                };
                shifted - Days::new(1)
            }
        };
        Self {
            cutoff: self.cutoff,
            end,
        }
    }

    pub fn next(&self) -> Self {
        self.advance(1)
    }

    pub fn previous(&self) -> Self {
        self.advance(-1)
    }

    /// Signed count of whole periods from `self` to `other`.
    pub fn periods_until(&self, other: &BillingPeriod) -> i32 {
        month_index(other.end) - month_index(self.end)
    }

    /// Last millisecond of the anchor day, pushed later by the grace period.
    pub fn end_instant(&self, grace: GracePeriod) -> DateTime<Utc> {
        let next_midnight = (self.end + Days::new(1)).and_time(NaiveTime::MIN);
        let end_of_day = Utc.from_utc_datetime(&next_midnight) - Duration::milliseconds(1);
        end_of_day
            .checked_add_signed(grace.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// First millisecond after the previous period closed.
    pub fn start_instant(&self, grace: GracePeriod) -> DateTime<Utc> {
        self.previous().end_instant(grace) + Duration::milliseconds(1)
    }

    /// Stable identifier, independent of the grace period.
    pub fn key(&self) -> String {
        format!("{}:{}", self.cutoff, self.end.format("%Y-%m"))
    }

    pub fn window(&self, grace: GracePeriod) -> PeriodWindow {
        PeriodWindow {
            key: self.key(),
            start: self.start_instant(grace),
            end: self.end_instant(grace),
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key(), self.end)
    }
}

fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, StudentId};

/// Length of a monthly subscription period.
pub const MONTHLY_PERIOD_DAYS: i64 = 30;

/// A student joined a course. At most one per (student, course).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Enrollment {
    #[must_use]
    pub fn new(student_id: StudentId, course_id: CourseId, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            student_id,
            course_id,
            enrolled_at,
            last_accessed_at: enrolled_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Free,
    Monthly,
    Lifetime,
}

impl SubscriptionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionType::Free => "free",
            SubscriptionType::Monthly => "monthly",
            SubscriptionType::Lifetime => "lifetime",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(SubscriptionType::Free),
            "monthly" => Some(SubscriptionType::Monthly),
            "lifetime" => Some(SubscriptionType::Lifetime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Free,
    Card,
    Upi,
}

impl PaymentMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Free => "free",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PaymentMethod::Free),
            "card" => Some(PaymentMethod::Card),
            "upi" => Some(PaymentMethod::Upi),
            _ => None,
        }
    }
}

/// Paid (or granted) access to a course beyond the free preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub kind: SubscriptionType,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub activated_at: DateTime<Utc>,
}

impl Subscription {
    /// End of the paid period; `None` for subscriptions that never lapse.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            SubscriptionType::Monthly => {
                Some(self.activated_at + Duration::days(MONTHLY_PERIOD_DAYS))
            }
            SubscriptionType::Free | SubscriptionType::Lifetime => None,
        }
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.activated_at && self.expires_at().is_none_or(|end| now < end)
    }
}

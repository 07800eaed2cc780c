use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }

    /// Only Pending/Processing rows may still be settled by a gateway callback.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Money was captured and (part of it) is still held by the platform.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }

    /// Priority rule for out-of-order gateway updates: open rows may move anywhere,
    /// captured rows may only move towards a refund, and Failed/Refunded are final.
    pub fn can_advance_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        match self {
            Pending => next != Pending,
            Processing => !matches!(next, Pending | Processing),
            Completed => matches!(next, Refunded | PartiallyRefunded),
            PartiallyRefunded => matches!(next, Refunded | PartiallyRefunded),
            Failed | Refunded => false,
        }
    }

    pub fn settled_statuses() -> Vec<PaymentStatus> {
        vec![PaymentStatus::Completed, PaymentStatus::PartiallyRefunded]
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

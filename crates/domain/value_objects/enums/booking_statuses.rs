use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Disputed => "disputed",
        }
    }

    /// Rows are written only through `as_str`, so an unknown value means a corrupt row
    /// and is surfaced rather than defaulted.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "disputed" => Some(BookingStatus::Disputed),
            _ => None,
        }
    }

    /// The lifecycle transition table. Transitions are monotonic; nothing leads back.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
                | (Completed, Disputed)
        )
    }

    /// Statuses in which a customer may still pay for the booking.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const ALL: [BookingStatus; 6] = [Pending, Confirmed, InProgress, Completed, Cancelled, Disputed];

    #[test]
    fn transition_table_matches_lifecycle() {
        let allowed = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, InProgress),
            (Confirmed, Completed),
            (Confirmed, Cancelled),
            (InProgress, Completed),
            (Completed, Disputed),
        ];

        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn string_form_is_stable() {
        for status in ALL {
            assert_eq!(BookingStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::from_str("on_the_way"), None);
    }
}

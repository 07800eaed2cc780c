use std::fmt::Display;

use super::booking_statuses::BookingStatus;

/// Client-facing vocabulary for provider status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAlias {
    OnTheWay,
    Arrived,
    InProgress,
    Completed,
}

impl StatusAlias {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusAlias::OnTheWay => "on_the_way",
            StatusAlias::Arrived => "arrived",
            StatusAlias::InProgress => "in_progress",
            StatusAlias::Completed => "completed",
        }
    }

    /// Unrecognised aliases are rejected, never mapped to a default.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_the_way" => Some(StatusAlias::OnTheWay),
            "arrived" => Some(StatusAlias::Arrived),
            "in_progress" => Some(StatusAlias::InProgress),
            "completed" => Some(StatusAlias::Completed),
            _ => None,
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            StatusAlias::OnTheWay | StatusAlias::Arrived => BookingStatus::Confirmed,
            StatusAlias::InProgress => BookingStatus::InProgress,
            StatusAlias::Completed => BookingStatus::Completed,
        }
    }
}

impl Display for StatusAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_aliases_onto_canonical_statuses() {
        assert_eq!(StatusAlias::from_str("on_the_way").map(|a| a.target()), Some(BookingStatus::Confirmed));
        assert_eq!(StatusAlias::from_str("arrived").map(|a| a.target()), Some(BookingStatus::Confirmed));
        assert_eq!(StatusAlias::from_str("In_Progress").map(|a| a.target()), Some(BookingStatus::InProgress));
        assert_eq!(StatusAlias::from_str("completed").map(|a| a.target()), Some(BookingStatus::Completed));
    }

    #[test]
    fn rejects_unknown_aliases() {
        assert_eq!(StatusAlias::from_str("cancelled"), None);
        assert_eq!(StatusAlias::from_str("done"), None);
        assert_eq!(StatusAlias::from_str(""), None);
    }
}

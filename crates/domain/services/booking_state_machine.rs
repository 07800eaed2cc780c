//! Validates lifecycle commands against a freshly read booking row and turns
//! them into a [`BookingTransition`]. Nothing here touches storage; the
//! repository applies the transition conditionally on `transition.from`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    entities::bookings::BookingEntity,
    value_objects::{
        bookings::{AcceptBookingModel, BookingTransition, CancelledBy},
        enums::{booking_statuses::BookingStatus, status_aliases::StatusAlias},
    },
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("not authorized to {action} this booking")]
    Unauthorized { action: &'static str },
    #[error("booking is already in status {0}")]
    AlreadyInStatus(BookingStatus),
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("booking in status {0} cannot be cancelled")]
    NotCancellable(BookingStatus),
    #[error("booking has unrecognised status {0:?}")]
    UnknownStatus(String),
    #[error("{0} is required")]
    MissingField(&'static str),
}

pub type TransitionResult<T> = std::result::Result<T, TransitionError>;

pub fn current_status(booking: &BookingEntity) -> TransitionResult<BookingStatus> {
    BookingStatus::from_str(&booking.status)
        .ok_or_else(|| TransitionError::UnknownStatus(booking.status.clone()))
}

/// Provider takes the booking. An unassigned booking is bound to the accepting provider.
pub fn accept(
    booking: &BookingEntity,
    provider_id: Uuid,
    model: &AcceptBookingModel,
    now: DateTime<Utc>,
) -> TransitionResult<BookingTransition> {
    if booking.provider_id.is_some_and(|assigned| assigned != provider_id) {
        return Err(TransitionError::Unauthorized { action: "accept" });
    }

    let from = current_status(booking)?;
    ensure_transition(from, BookingStatus::Confirmed)?;

    let mut transition = BookingTransition::new(booking.id, from, BookingStatus::Confirmed, now);
    transition.provider_id = Some(provider_id);
    transition.estimated_arrival = model.estimated_arrival;
    transition.provider_notes = append_note(booking.provider_notes.as_deref(), model.notes.as_deref());

    Ok(transition)
}

/// Provider turns the booking down. The booking is cancelled, not reassigned.
pub fn decline(
    booking: &BookingEntity,
    provider_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> TransitionResult<BookingTransition> {
    ensure_assigned_provider(booking, provider_id, "decline")?;
    let reason = required(reason, "reason")?;

    let from = current_status(booking)?;
    match from {
        BookingStatus::Pending => {}
        BookingStatus::Cancelled => return Err(TransitionError::AlreadyInStatus(from)),
        _ => {
            return Err(TransitionError::InvalidTransition {
                from,
                to: BookingStatus::Cancelled,
            });
        }
    }

    let mut transition = BookingTransition::new(booking.id, from, BookingStatus::Cancelled, now);
    transition.cancellation_reason = Some(reason);
    transition.cancelled_at = Some(now);

    Ok(transition)
}

/// Either party calls the booking off before work starts.
pub fn cancel(
    booking: &BookingEntity,
    actor_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> TransitionResult<(BookingTransition, CancelledBy)> {
    let cancelled_by = if actor_id == booking.customer_id {
        CancelledBy::Customer
    } else if booking.provider_id == Some(actor_id) {
        CancelledBy::Provider
    } else {
        return Err(TransitionError::Unauthorized { action: "cancel" });
    };
    let reason = required(reason, "reason")?;

    let from = current_status(booking)?;
    match from {
        BookingStatus::Pending | BookingStatus::Confirmed => {}
        BookingStatus::Cancelled => return Err(TransitionError::AlreadyInStatus(from)),
        _ => return Err(TransitionError::NotCancellable(from)),
    }

    let mut transition = BookingTransition::new(booking.id, from, BookingStatus::Cancelled, now);
    transition.cancellation_reason = Some(reason);
    transition.cancelled_at = Some(now);

    Ok((transition, cancelled_by))
}

/// Provider moves an accepted booking into execution or completion.
pub fn advance(
    booking: &BookingEntity,
    provider_id: Uuid,
    target: BookingStatus,
    notes: Option<&str>,
    photo_urls: Option<&[String]>,
    now: DateTime<Utc>,
) -> TransitionResult<BookingTransition> {
    ensure_assigned_provider(booking, provider_id, "update")?;

    let from = current_status(booking)?;
    if !matches!(target, BookingStatus::InProgress | BookingStatus::Completed) {
        return Err(TransitionError::InvalidTransition { from, to: target });
    }
    ensure_transition(from, target)?;

    let mut transition = BookingTransition::new(booking.id, from, target, now);
    if booking.started_at.is_none() {
        transition.started_at = Some(now);
    }
    if target == BookingStatus::Completed {
        transition.completed_at = Some(now);
    }
    transition.provider_notes = append_note(booking.provider_notes.as_deref(), notes);
    transition.completion_photo_urls = photo_urls
        .filter(|urls| !urls.is_empty())
        .map(|urls| {
            let mut merged = booking.completion_photo_urls.clone();
            merged.extend(urls.iter().cloned());
            merged
        });

    Ok(transition)
}

/// `on_the_way` / `arrived` keep a confirmed booking confirmed and only leave a trail
/// in the provider notes.
pub fn record_progress(
    booking: &BookingEntity,
    provider_id: Uuid,
    alias: StatusAlias,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> TransitionResult<BookingTransition> {
    ensure_assigned_provider(booking, provider_id, "update")?;

    let from = current_status(booking)?;
    if from != BookingStatus::Confirmed {
        return Err(TransitionError::InvalidTransition {
            from,
            to: alias.target(),
        });
    }

    let entry = match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("[{alias}] {note}"),
        None => format!("[{alias}]"),
    };

    let mut transition = BookingTransition::new(booking.id, from, from, now);
    transition.provider_notes = append_note(booking.provider_notes.as_deref(), Some(&entry));

    Ok(transition)
}

/// A captured payment confirms a booking that is still pending. Already confirmed
/// bookings need no change.
pub fn confirm_by_payment(
    booking: &BookingEntity,
    now: DateTime<Utc>,
) -> TransitionResult<Option<BookingTransition>> {
    let from = current_status(booking)?;
    if from != BookingStatus::Pending {
        return Ok(None);
    }

    Ok(Some(BookingTransition::new(
        booking.id,
        from,
        BookingStatus::Confirmed,
        now,
    )))
}

fn ensure_transition(from: BookingStatus, to: BookingStatus) -> TransitionResult<()> {
    if from == to {
        return Err(TransitionError::AlreadyInStatus(to));
    }
    if !from.can_transition_to(to) {
        return Err(TransitionError::InvalidTransition { from, to });
    }
    Ok(())
}

fn ensure_assigned_provider(
    booking: &BookingEntity,
    provider_id: Uuid,
    action: &'static str,
) -> TransitionResult<()> {
    if booking.provider_id == Some(provider_id) {
        Ok(())
    } else {
        Err(TransitionError::Unauthorized { action })
    }
}

fn required(value: &str, field: &'static str) -> TransitionResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TransitionError::MissingField(field));
    }
    Ok(trimmed.to_string())
}

/// Notes are a narrative: new entries go on a new line, nothing is overwritten.
fn append_note(existing: Option<&str>, note: Option<&str>) -> Option<String> {
    let note = note.map(str::trim).filter(|n| !n.is_empty())?;
    match existing.filter(|e| !e.is_empty()) {
        Some(existing) => Some(format!("{existing}\n{note}")),
        None => Some(note.to_string()),
    }
}

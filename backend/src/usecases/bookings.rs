use chrono::Utc;
use crates::{
    domain::{
        entities::bookings::{BookingEntity, InsertBookingEntity},
        repositories::{bookings::BookingRepository, payments::PaymentRepository},
        services::{
            booking_state_machine::{self, TransitionError},
            settlement_calculator::{self, SettlementCalculator},
        },
        value_objects::{
            bookings::{
                AcceptBookingModel, BookingDto, BookingTransition, CancellationDto, CancelledBy,
                CreateBookingModel, RefundOutcome, UpdateBookingStatusModel,
                generate_booking_number,
            },
            enums::{
                booking_statuses::BookingStatus, payment_statuses::PaymentStatus,
                status_aliases::StatusAlias,
            },
            iam::Actor,
            money::{from_minor, is_valid_currency, percentage_to_basis_points, to_minor},
            payments::PaymentRefundUpdate,
        },
    },
    notifications::NotificationDispatcher,
    payments::gateway::{PaymentGateway, RefundRequest},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    payments::payment_status,
    settlement_error::{SettlementError, UseCaseResult},
};

pub const REFUND_FAILED_MESSAGE: &str = "booking cancelled; refund failed, will be retried manually";

pub struct BookingUseCase<B, P, G, N>
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    booking_repository: Arc<B>,
    payment_repository: Arc<P>,
    gateway: Arc<G>,
    notifier: Arc<N>,
    calculator: SettlementCalculator,
}

impl<B, P, G, N> BookingUseCase<B, P, G, N>
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(
        booking_repository: Arc<B>,
        payment_repository: Arc<P>,
        gateway: Arc<G>,
        notifier: Arc<N>,
        calculator: SettlementCalculator,
    ) -> Self {
        Self {
            booking_repository,
            payment_repository,
            gateway,
            notifier,
            calculator,
        }
    }

    pub async fn create_booking(
        &self,
        customer_id: Uuid,
        model: CreateBookingModel,
    ) -> UseCaseResult<BookingDto> {
        info!(%customer_id, service_id = %model.service_id, "bookings: create requested");

        let now = Utc::now();
        if model.scheduled_at <= now {
            return Err(self.rejected(customer_id, "scheduled_at must be in the future"));
        }
        if model.service_price <= Decimal::ZERO {
            return Err(self.rejected(customer_id, "service_price must be positive"));
        }
        if model.vat_percentage < Decimal::ZERO || model.vat_percentage > Decimal::ONE_HUNDRED {
            return Err(self.rejected(customer_id, "vat_percentage must be between 0 and 100"));
        }
        if !is_valid_currency(&model.currency) {
            return Err(self.rejected(customer_id, "currency must be a 3-letter code"));
        }
        if model.provider_id == Some(customer_id) {
            return Err(self.rejected(customer_id, "customer cannot book themselves"));
        }

        let vat_amount = settlement_calculator::vat_amount(model.service_price, model.vat_percentage);
        let total_amount = model.service_price + vat_amount;

        let insert_booking_entity = InsertBookingEntity {
            booking_number: generate_booking_number(now),
            customer_id,
            provider_id: model.provider_id,
            service_id: model.service_id,
            address_id: model.address_id,
            scheduled_at: model.scheduled_at,
            service_price_minor: to_minor(model.service_price)
                .map_err(|err| SettlementError::Validation(err.to_string()))?,
            vat_amount_minor: to_minor(vat_amount)
                .map_err(|err| SettlementError::Validation(err.to_string()))?,
            vat_percentage_bp: percentage_to_basis_points(model.vat_percentage)
                .map_err(|err| SettlementError::Validation(err.to_string()))?,
            total_amount_minor: to_minor(total_amount)
                .map_err(|err| SettlementError::Validation(err.to_string()))?,
            currency: model.currency.to_ascii_lowercase(),
            status: BookingStatus::Pending.to_string(),
            special_instructions: model
                .special_instructions
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            created_at: now,
            updated_at: now,
        };

        let booking = self
            .booking_repository
            .create(insert_booking_entity)
            .await
            .map_err(|err| {
                error!(%customer_id, db_error = ?err, "bookings: failed to create booking");
                SettlementError::Internal(err)
            })?;

        info!(
            booking_id = %booking.id,
            booking_number = %booking.booking_number,
            total_amount_minor = booking.total_amount_minor,
            "bookings: booking created"
        );

        if let Some(provider_id) = booking.provider_id {
            self.notifier
                .notify_status_change(provider_id, booking.id, BookingStatus::Pending);
        }

        Ok(BookingDto::from_entity(booking, None))
    }

    pub async fn get_booking(&self, actor: Actor, booking_id: Uuid) -> UseCaseResult<BookingDto> {
        let booking = self.load_booking(booking_id).await?;

        let is_party =
            booking.customer_id == actor.user_id || booking.provider_id == Some(actor.user_id);
        if !is_party && !actor.is_admin {
            let err = SettlementError::Forbidden("booking belongs to another user".to_string());
            warn!(
                user_id = %actor.user_id,
                %booking_id,
                status = err.status_code().as_u16(),
                "bookings: read denied"
            );
            return Err(err);
        }

        let settlement = (booking.status == BookingStatus::Completed.as_str())
            .then(|| self.calculator.breakdown(from_minor(booking.service_price_minor)));

        Ok(BookingDto::from_entity(booking, settlement))
    }

    pub async fn accept(
        &self,
        provider_id: Uuid,
        booking_id: Uuid,
        model: AcceptBookingModel,
    ) -> UseCaseResult<BookingDto> {
        info!(%provider_id, %booking_id, "bookings: accept requested");

        let booking = self.load_booking(booking_id).await?;
        let transition = booking_state_machine::accept(&booking, provider_id, &model, Utc::now())
            .map_err(|err| self.transition_rejected(booking_id, provider_id, "accept", err))?;

        let updated = self.commit_transition(transition, None).await?;
        info!(%booking_id, %provider_id, "bookings: booking confirmed");

        self.notifier
            .notify_status_change(updated.customer_id, updated.id, BookingStatus::Confirmed);

        Ok(BookingDto::from_entity(updated, None))
    }

    pub async fn decline(
        &self,
        provider_id: Uuid,
        booking_id: Uuid,
        reason: String,
    ) -> UseCaseResult<BookingDto> {
        info!(%provider_id, %booking_id, "bookings: decline requested");

        let booking = self.load_booking(booking_id).await?;
        let transition = booking_state_machine::decline(&booking, provider_id, &reason, Utc::now())
            .map_err(|err| self.transition_rejected(booking_id, provider_id, "decline", err))?;

        let updated = self.commit_transition(transition, None).await?;
        info!(%booking_id, %provider_id, "bookings: booking declined");

        self.notifier
            .notify_status_change(updated.customer_id, updated.id, BookingStatus::Cancelled);

        Ok(BookingDto::from_entity(updated, None))
    }

    /// Cancels on behalf of the customer or the assigned provider and refunds the
    /// captured payment according to the notice period. The gateway refund runs
    /// before the write; if it fails the booking is cancelled anyway and the outcome
    /// says so.
    pub async fn cancel(
        &self,
        actor_id: Uuid,
        booking_id: Uuid,
        reason: String,
    ) -> UseCaseResult<CancellationDto> {
        info!(%actor_id, %booking_id, "bookings: cancel requested");

        let now = Utc::now();
        let booking = self.load_booking(booking_id).await?;
        let (transition, cancelled_by) =
            booking_state_machine::cancel(&booking, actor_id, &reason, now)
                .map_err(|err| self.transition_rejected(booking_id, actor_id, "cancel", err))?;

        let refund_percentage =
            settlement_calculator::refund_percentage(transition.from, booking.scheduled_at - now)?;

        let payment = self
            .payment_repository
            .find_settled_by_booking(booking_id)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "bookings: failed to load payment for cancel");
                SettlementError::Internal(err)
            })?;

        let mut refund_amount = Decimal::ZERO;
        let mut refund_outcome = RefundOutcome::NotApplicable;
        let mut refund_update = None;

        if let Some(payment) = payment.filter(|_| refund_percentage > 0) {
            refund_amount = settlement_calculator::refund_amount(
                from_minor(payment.amount_minor),
                from_minor(payment.refund_amount_minor),
                refund_percentage,
            );
            let refund_minor = to_minor(refund_amount)?;

            if refund_minor > 0 {
                let expected_status = payment_status(&payment)?;

                match payment.transaction_id.clone() {
                    None => {
                        warn!(
                            %booking_id,
                            payment_id = %payment.id,
                            "bookings: settled payment has no gateway reference; refund skipped"
                        );
                        refund_outcome = RefundOutcome::Failed;
                    }
                    Some(transaction_id) => {
                        let request = RefundRequest {
                            transaction_id,
                            amount_minor: refund_minor,
                            reason: reason.trim().to_string(),
                            idempotency_key: format!("cancel-{booking_id}"),
                        };

                        match self.gateway.refund(request).await {
                            Ok(result) if result.is_accepted() => {
                                let new_total = payment.refund_amount_minor + refund_minor;
                                let status = if new_total >= payment.amount_minor {
                                    PaymentStatus::Refunded
                                } else {
                                    PaymentStatus::PartiallyRefunded
                                };
                                refund_outcome = match status {
                                    PaymentStatus::Refunded => RefundOutcome::Refunded,
                                    _ => RefundOutcome::PartiallyRefunded,
                                };
                                refund_update = Some(PaymentRefundUpdate {
                                    payment_id: payment.id,
                                    expected_status,
                                    expected_refund_minor: payment.refund_amount_minor,
                                    status,
                                    refund_amount_minor: new_total,
                                    refunded_at: now,
                                    refund_reason: reason.trim().to_string(),
                                    gateway_response: result.refund_id,
                                });
                                info!(
                                    %booking_id,
                                    payment_id = %payment.id,
                                    refund_minor,
                                    refund_percentage,
                                    "bookings: cancellation refund accepted by gateway"
                                );
                            }
                            Ok(result) => {
                                warn!(
                                    %booking_id,
                                    payment_id = %payment.id,
                                    refund_minor,
                                    gateway_error = ?result.error_message,
                                    "bookings: gateway rejected cancellation refund"
                                );
                                refund_outcome = RefundOutcome::Failed;
                            }
                            Err(err) => {
                                error!(
                                    %booking_id,
                                    payment_id = %payment.id,
                                    refund_minor,
                                    error = ?err,
                                    "bookings: cancellation refund call failed"
                                );
                                refund_outcome = RefundOutcome::Failed;
                            }
                        }
                    }
                }
            }
        }

        let updated = match self.commit_transition(transition, refund_update.clone()).await {
            Ok(updated) => updated,
            Err(err) => {
                // The gateway already moved the money; the payment row must say so even
                // though the booking stays where it is.
                if let Some(update) = refund_update {
                    self.record_orphaned_refund(booking_id, update).await;
                }
                return Err(err);
            }
        };
        info!(
            %booking_id,
            cancelled_by = ?cancelled_by,
            refund_percentage,
            refund_outcome = ?refund_outcome,
            "bookings: booking cancelled"
        );

        let counterparty = match cancelled_by {
            CancelledBy::Customer => updated.provider_id,
            CancelledBy::Provider => Some(updated.customer_id),
        };
        if let Some(user_id) = counterparty {
            self.notifier
                .notify_status_change(user_id, updated.id, BookingStatus::Cancelled);
        }

        Ok(CancellationDto {
            booking: BookingDto::from_entity(updated, None),
            cancelled_by,
            refund_percentage,
            refund_amount,
            refund_outcome,
        })
    }

    pub async fn update_status(
        &self,
        provider_id: Uuid,
        booking_id: Uuid,
        model: UpdateBookingStatusModel,
    ) -> UseCaseResult<BookingDto> {
        info!(%provider_id, %booking_id, status = %model.status, "bookings: status update requested");

        let alias = StatusAlias::from_str(&model.status).ok_or_else(|| {
            let err = SettlementError::Validation(format!("unknown status {:?}", model.status));
            warn!(
                %booking_id,
                status = err.status_code().as_u16(),
                "bookings: unknown status alias"
            );
            err
        })?;

        let booking = self.load_booking(booking_id).await?;
        let now = Utc::now();
        let transition = match alias {
            StatusAlias::OnTheWay | StatusAlias::Arrived => booking_state_machine::record_progress(
                &booking,
                provider_id,
                alias,
                model.notes.as_deref(),
                now,
            ),
            StatusAlias::InProgress | StatusAlias::Completed => booking_state_machine::advance(
                &booking,
                provider_id,
                alias.target(),
                model.notes.as_deref(),
                model.photo_urls.as_deref(),
                now,
            ),
        }
        .map_err(|err| self.transition_rejected(booking_id, provider_id, "update", err))?;

        let updated = self.commit_transition(transition, None).await?;
        info!(%booking_id, alias = %alias, status = %updated.status, "bookings: status updated");

        self.notifier
            .notify_status_change(updated.customer_id, updated.id, alias.target());

        let settlement = (alias == StatusAlias::Completed)
            .then(|| self.calculator.breakdown(from_minor(updated.service_price_minor)));

        Ok(BookingDto::from_entity(updated, settlement))
    }

    async fn load_booking(&self, booking_id: Uuid) -> UseCaseResult<BookingEntity> {
        self.booking_repository
            .find_by_id(booking_id)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "bookings: failed to load booking");
                SettlementError::Internal(err)
            })?
            .ok_or_else(|| {
                let err = SettlementError::NotFound("booking");
                warn!(
                    %booking_id,
                    status = err.status_code().as_u16(),
                    "bookings: booking not found"
                );
                err
            })
    }

    /// Applies the transition with compare-and-swap. When another request got there
    /// first, the caller learns whether the booking already reached the same target.
    async fn commit_transition(
        &self,
        transition: BookingTransition,
        refund: Option<PaymentRefundUpdate>,
    ) -> UseCaseResult<BookingEntity> {
        let booking_id = transition.booking_id;
        let target = transition.to;

        let applied = self
            .booking_repository
            .apply_transition(transition, refund)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "bookings: failed to apply transition");
                SettlementError::Internal(err)
            })?;

        if let Some(updated) = applied {
            return Ok(updated);
        }

        let current = self.load_booking(booking_id).await?;
        let err = if current.status == target.as_str() {
            SettlementError::AlreadyInStatus(target)
        } else {
            SettlementError::ConcurrentModification
        };
        warn!(
            %booking_id,
            current_status = %current.status,
            target = %target,
            status = err.status_code().as_u16(),
            "bookings: lost status race"
        );

        Err(err)
    }

    async fn record_orphaned_refund(&self, booking_id: Uuid, update: PaymentRefundUpdate) {
        let payment_id = update.payment_id;
        let refund_amount_minor = update.refund_amount_minor;

        match self.payment_repository.apply_refund(update).await {
            Ok(true) => warn!(
                %booking_id,
                %payment_id,
                refund_amount_minor,
                "bookings: cancel lost the status race after the gateway refunded; refund recorded on payment only"
            ),
            Ok(false) => error!(
                %booking_id,
                %payment_id,
                refund_amount_minor,
                "bookings: gateway refunded but payment changed concurrently; needs manual reconciliation"
            ),
            Err(err) => error!(
                %booking_id,
                %payment_id,
                refund_amount_minor,
                db_error = ?err,
                "bookings: gateway refunded but refund could not be recorded; needs manual reconciliation"
            ),
        }
    }

    fn transition_rejected(
        &self,
        booking_id: Uuid,
        actor_id: Uuid,
        action: &'static str,
        err: TransitionError,
    ) -> SettlementError {
        let err = SettlementError::from(err);
        warn!(
            %booking_id,
            %actor_id,
            action,
            error = %err,
            status = err.status_code().as_u16(),
            "bookings: transition rejected"
        );
        err
    }

    fn rejected(&self, customer_id: Uuid, message: &str) -> SettlementError {
        let err = SettlementError::Validation(message.to_string());
        warn!(
            %customer_id,
            error = %err,
            status = err.status_code().as_u16(),
            "bookings: create rejected"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use crates::{
        domain::{
            entities::payments::PaymentEntity,
            repositories::{bookings::MockBookingRepository, payments::MockPaymentRepository},
        },
        notifications::MockNotificationDispatcher,
        payments::gateway::{MockPaymentGateway, RefundResult, RefundStatus},
    };
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    struct Fixture {
        bookings: MockBookingRepository,
        payments: MockPaymentRepository,
        gateway: MockPaymentGateway,
        notifier: MockNotificationDispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bookings: MockBookingRepository::new(),
                payments: MockPaymentRepository::new(),
                gateway: MockPaymentGateway::new(),
                notifier: MockNotificationDispatcher::new(),
            }
        }

        fn usecase(
            self,
        ) -> BookingUseCase<
            MockBookingRepository,
            MockPaymentRepository,
            MockPaymentGateway,
            MockNotificationDispatcher,
        > {
            BookingUseCase::new(
                Arc::new(self.bookings),
                Arc::new(self.payments),
                Arc::new(self.gateway),
                Arc::new(self.notifier),
                SettlementCalculator::new(dec!(0.18)).unwrap(),
            )
        }
    }

    fn sample_booking(
        status: BookingStatus,
        provider_id: Option<Uuid>,
        scheduled_at: DateTime<Utc>,
    ) -> BookingEntity {
        let now = Utc::now();
        BookingEntity {
            id: Uuid::new_v4(),
            booking_number: "BK-20261018-ABC234".to_string(),
            customer_id: Uuid::new_v4(),
            provider_id,
            service_id: Uuid::new_v4(),
            address_id: Uuid::new_v4(),
            scheduled_at,
            service_price_minor: 10_000,
            vat_amount_minor: 1_500,
            vat_percentage_bp: 1_500,
            total_amount_minor: 11_500,
            currency: "sar".to_string(),
            status: status.to_string(),
            special_instructions: None,
            provider_notes: None,
            cancellation_reason: None,
            estimated_arrival: None,
            completion_photo_urls: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn completed_payment(booking_id: Uuid, amount_minor: i64) -> PaymentEntity {
        let now = Utc::now();
        PaymentEntity {
            id: Uuid::new_v4(),
            booking_id,
            amount_minor,
            currency: "sar".to_string(),
            payment_method: "card".to_string(),
            status: PaymentStatus::Completed.to_string(),
            transaction_id: Some("pi_123".to_string()),
            gateway_response: None,
            refund_amount_minor: 0,
            refunded_at: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Echoes the transition back as the stored row, as the database would.
    fn applied(booking: &BookingEntity, transition: &BookingTransition) -> BookingEntity {
        let mut updated = booking.clone();
        updated.status = transition.to.to_string();
        updated.provider_id = transition.provider_id.or(booking.provider_id);
        updated.started_at = transition.started_at.or(booking.started_at);
        updated.completed_at = transition.completed_at.or(booking.completed_at);
        updated.cancelled_at = transition.cancelled_at.or(booking.cancelled_at);
        updated.cancellation_reason = transition
            .cancellation_reason
            .clone()
            .or(booking.cancellation_reason.clone());
        updated.provider_notes = transition.provider_notes.clone().or(booking.provider_notes.clone());
        if let Some(urls) = transition.completion_photo_urls.clone() {
            updated.completion_photo_urls = urls;
        }
        updated
    }

    fn expect_find(fixture: &mut Fixture, booking: &BookingEntity) {
        let found = booking.clone();
        fixture
            .bookings
            .expect_find_by_id()
            .with(eq(booking.id))
            .returning(move |_| Ok(Some(found.clone())));
    }

    #[tokio::test]
    async fn cancel_thirty_hours_out_refunds_full_payment() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::hours(30),
        );
        let payment = completed_payment(booking.id, 10_000);
        let payment_id = payment.id;

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .with(eq(booking.id))
            .returning(move |_| Ok(Some(payment.clone())));
        fixture
            .gateway
            .expect_refund()
            .withf(|request| request.amount_minor == 10_000 && request.transaction_id == "pi_123")
            .times(1)
            .returning(|_| {
                Ok(RefundResult {
                    refund_id: Some("re_1".to_string()),
                    status: RefundStatus::Succeeded,
                    error_message: None,
                })
            });
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(move |transition, refund| {
                transition.to == BookingStatus::Cancelled
                    && refund.as_ref().is_some_and(|r| {
                        r.payment_id == payment_id
                            && r.status == PaymentStatus::Refunded
                            && r.refund_amount_minor == 10_000
                            && r.expected_refund_minor == 0
                    })
            })
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .with(eq(provider_id), eq(booking.id), eq(BookingStatus::Cancelled))
            .times(1)
            .return_const(());

        let customer_id = booking.customer_id;
        let result = fixture
            .usecase()
            .cancel(customer_id, booking.id, "plans changed".to_string())
            .await
            .unwrap();

        assert_eq!(result.refund_percentage, 100);
        assert_eq!(result.refund_amount, dec!(100.00));
        assert_eq!(result.refund_outcome, RefundOutcome::Refunded);
        assert_eq!(result.cancelled_by, CancelledBy::Customer);
        assert_eq!(result.booking.status, "cancelled");
        assert!(result.booking.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn cancel_ten_hours_out_skips_gateway_and_keeps_payment() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::hours(10),
        );
        let payment = completed_payment(booking.id, 20_000);

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture.gateway.expect_refund().never();
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(|transition, refund| transition.to == BookingStatus::Cancelled && refund.is_none())
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .return_const(());

        let result = fixture
            .usecase()
            .cancel(booking.customer_id, booking.id, "too late".to_string())
            .await
            .unwrap();

        assert_eq!(result.refund_percentage, 0);
        assert_eq!(result.refund_amount, Decimal::ZERO);
        assert_eq!(result.refund_outcome, RefundOutcome::NotApplicable);
        assert_eq!(result.booking.status, "cancelled");
    }

    #[tokio::test]
    async fn cancel_in_progress_booking_is_rejected_without_writes() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::InProgress,
            Some(provider_id),
            Utc::now() + Duration::hours(1),
        );

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture.bookings.expect_apply_transition().never();
        fixture.payments.expect_find_settled_by_booking().never();
        fixture.gateway.expect_refund().never();
        fixture.notifier.expect_notify_status_change().never();

        let err = fixture
            .usecase()
            .cancel(booking.customer_id, booking.id, "changed my mind".to_string())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SettlementError::Transition(TransitionError::NotCancellable(BookingStatus::InProgress))
        ));
    }

    #[tokio::test]
    async fn refund_failure_still_cancels_booking() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Pending,
            Some(provider_id),
            Utc::now() + Duration::hours(2),
        );
        let payment = completed_payment(booking.id, 11_500);

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture
            .gateway
            .expect_refund()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(|_, refund| refund.is_none())
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .with(eq(booking.customer_id), eq(booking.id), eq(BookingStatus::Cancelled))
            .times(1)
            .return_const(());

        let result = fixture
            .usecase()
            .cancel(provider_id, booking.id, "sick".to_string())
            .await
            .unwrap();

        assert_eq!(result.refund_percentage, 100);
        assert_eq!(result.refund_outcome, RefundOutcome::Failed);
        assert_eq!(result.cancelled_by, CancelledBy::Provider);
        assert_eq!(result.booking.status, "cancelled");
    }

    #[tokio::test]
    async fn cancel_eighteen_hours_out_partially_refunds() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::hours(18),
        );
        let payment = completed_payment(booking.id, 10_000);
        let payment_id = payment.id;

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture
            .gateway
            .expect_refund()
            .withf(|request| request.amount_minor == 5_000)
            .times(1)
            .returning(|_| {
                Ok(RefundResult {
                    refund_id: Some("re_half".to_string()),
                    status: RefundStatus::Succeeded,
                    error_message: None,
                })
            });
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(move |_, refund| {
                refund.as_ref().is_some_and(|r| {
                    r.payment_id == payment_id
                        && r.expected_status == PaymentStatus::Completed
                        && r.status == PaymentStatus::PartiallyRefunded
                        && r.refund_amount_minor == 5_000
                })
            })
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .return_const(());

        let result = fixture
            .usecase()
            .cancel(booking.customer_id, booking.id, "work trip".to_string())
            .await
            .unwrap();

        assert_eq!(result.refund_percentage, 50);
        assert_eq!(result.refund_amount, dec!(50.00));
        assert_eq!(result.refund_outcome, RefundOutcome::PartiallyRefunded);
    }

    #[tokio::test]
    async fn cancel_caps_refund_at_remaining_balance() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Pending,
            Some(provider_id),
            Utc::now() + Duration::hours(48),
        );
        let mut payment = completed_payment(booking.id, 10_000);
        payment.status = PaymentStatus::PartiallyRefunded.to_string();
        payment.refund_amount_minor = 7_000;

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture
            .gateway
            .expect_refund()
            .withf(|request| request.amount_minor == 3_000)
            .times(1)
            .returning(|_| {
                Ok(RefundResult {
                    refund_id: Some("re_rest".to_string()),
                    status: RefundStatus::Pending,
                    error_message: None,
                })
            });
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(|_, refund| {
                refund.as_ref().is_some_and(|r| {
                    r.expected_status == PaymentStatus::PartiallyRefunded
                        && r.expected_refund_minor == 7_000
                        && r.refund_amount_minor == 10_000
                        && r.status == PaymentStatus::Refunded
                })
            })
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .return_const(());

        let result = fixture
            .usecase()
            .cancel(booking.customer_id, booking.id, "no longer needed".to_string())
            .await
            .unwrap();

        assert_eq!(result.refund_percentage, 100);
        assert_eq!(result.refund_amount, dec!(30.00));
        assert_eq!(result.refund_outcome, RefundOutcome::Refunded);
    }

    #[tokio::test]
    async fn cancel_losing_race_after_gateway_refund_still_records_refund() {
        let provider_id = Uuid::new_v4();
        let confirmed = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::hours(30),
        );
        let mut in_progress = confirmed.clone();
        in_progress.status = BookingStatus::InProgress.to_string();
        let payment = completed_payment(confirmed.id, 10_000);
        let payment_id = payment.id;

        let mut fixture = Fixture::new();
        let mut reads = vec![in_progress, confirmed.clone()];
        fixture
            .bookings
            .expect_find_by_id()
            .times(2)
            .returning(move |_| Ok(reads.pop()));
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture
            .gateway
            .expect_refund()
            .withf(|request| request.amount_minor == 10_000)
            .times(1)
            .returning(|_| {
                Ok(RefundResult {
                    refund_id: Some("re_1".to_string()),
                    status: RefundStatus::Succeeded,
                    error_message: None,
                })
            });
        fixture
            .bookings
            .expect_apply_transition()
            .times(1)
            .returning(|_, _| Ok(None));
        fixture
            .payments
            .expect_apply_refund()
            .withf(move |update| {
                update.payment_id == payment_id
                    && update.status == PaymentStatus::Refunded
                    && update.refund_amount_minor == 10_000
                    && update.gateway_response.as_deref() == Some("re_1")
            })
            .times(1)
            .returning(|_| Ok(true));
        fixture.notifier.expect_notify_status_change().never();

        let err = fixture
            .usecase()
            .cancel(confirmed.customer_id, confirmed.id, "plans changed".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::ConcurrentModification));
    }

    #[tokio::test]
    async fn cancel_with_corrupt_payment_status_fails_before_refunding() {
        let booking = sample_booking(
            BookingStatus::Pending,
            Some(Uuid::new_v4()),
            Utc::now() + Duration::hours(48),
        );
        let mut payment = completed_payment(booking.id, 10_000);
        payment.status = "captured".to_string();

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture
            .payments
            .expect_find_settled_by_booking()
            .returning(move |_| Ok(Some(payment.clone())));
        fixture.gateway.expect_refund().never();
        fixture.bookings.expect_apply_transition().never();
        fixture.notifier.expect_notify_status_change().never();

        let err = fixture
            .usecase()
            .cancel(booking.customer_id, booking.id, "plans changed".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Internal(_)));
    }

    #[tokio::test]
    async fn completing_confirmed_booking_sets_both_timestamps() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() - Duration::hours(1),
        );

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .with(eq(booking.customer_id), eq(booking.id), eq(BookingStatus::Completed))
            .times(1)
            .return_const(());

        let result = fixture
            .usecase()
            .update_status(
                provider_id,
                booking.id,
                UpdateBookingStatusModel {
                    status: "completed".to_string(),
                    notes: Some("all done".to_string()),
                    photo_urls: Some(vec!["https://cdn.example.com/1.jpg".to_string()]),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, "completed");
        assert!(result.started_at.is_some());
        assert_eq!(result.started_at, result.completed_at);
        assert_eq!(result.completion_photo_urls.len(), 1);
        let settlement = result.settlement.unwrap();
        assert_eq!(settlement.platform_commission, dec!(18.00));
        assert_eq!(settlement.provider_earnings, dec!(82.00));
    }

    #[tokio::test]
    async fn unknown_status_alias_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.bookings.expect_find_by_id().never();

        let err = fixture
            .usecase()
            .update_status(
                Uuid::new_v4(),
                Uuid::new_v4(),
                UpdateBookingStatusModel {
                    status: "teleported".to_string(),
                    notes: None,
                    photo_urls: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn on_the_way_keeps_booking_confirmed_and_notifies_customer() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::hours(1),
        );

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(|transition, _| {
                transition.from == BookingStatus::Confirmed && transition.to == BookingStatus::Confirmed
            })
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .with(eq(booking.customer_id), eq(booking.id), eq(BookingStatus::Confirmed))
            .times(1)
            .return_const(());

        let result = fixture
            .usecase()
            .update_status(
                provider_id,
                booking.id,
                UpdateBookingStatusModel {
                    status: "On_The_Way".to_string(),
                    notes: Some("10 minutes".to_string()),
                    photo_urls: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, "confirmed");
        assert!(result.provider_notes.unwrap().contains("10 minutes"));
    }

    #[tokio::test]
    async fn accept_binds_provider_and_notifies_customer() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(BookingStatus::Pending, None, Utc::now() + Duration::days(2));

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        let stored = booking.clone();
        fixture
            .bookings
            .expect_apply_transition()
            .withf(move |transition, _| transition.provider_id == Some(provider_id))
            .times(1)
            .returning(move |transition, _| Ok(Some(applied(&stored, &transition))));
        fixture
            .notifier
            .expect_notify_status_change()
            .with(eq(booking.customer_id), eq(booking.id), eq(BookingStatus::Confirmed))
            .times(1)
            .return_const(());

        let result = fixture
            .usecase()
            .accept(provider_id, booking.id, AcceptBookingModel::default())
            .await
            .unwrap();

        assert_eq!(result.status, "confirmed");
        assert_eq!(result.provider_id, Some(provider_id));
    }

    #[tokio::test]
    async fn second_accept_fails_with_already_in_status() {
        let provider_id = Uuid::new_v4();
        let booking = sample_booking(
            BookingStatus::Confirmed,
            Some(provider_id),
            Utc::now() + Duration::days(2),
        );

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture.bookings.expect_apply_transition().never();
        fixture.notifier.expect_notify_status_change().never();

        let err = fixture
            .usecase()
            .accept(provider_id, booking.id, AcceptBookingModel::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SettlementError::Transition(TransitionError::AlreadyInStatus(BookingStatus::Confirmed))
        ));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn losing_accept_race_reports_already_in_status() {
        let provider_id = Uuid::new_v4();
        let pending = sample_booking(BookingStatus::Pending, Some(provider_id), Utc::now() + Duration::days(2));
        let mut confirmed = pending.clone();
        confirmed.status = BookingStatus::Confirmed.to_string();

        let mut fixture = Fixture::new();
        let mut reads = vec![confirmed, pending.clone()];
        fixture
            .bookings
            .expect_find_by_id()
            .times(2)
            .returning(move |_| Ok(reads.pop()));
        fixture
            .bookings
            .expect_apply_transition()
            .times(1)
            .returning(|_, _| Ok(None));
        fixture.notifier.expect_notify_status_change().never();

        let err = fixture
            .usecase()
            .accept(provider_id, pending.id, AcceptBookingModel::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::AlreadyInStatus(BookingStatus::Confirmed)));
    }

    #[tokio::test]
    async fn decline_by_other_provider_is_unauthorized() {
        let booking = sample_booking(
            BookingStatus::Pending,
            Some(Uuid::new_v4()),
            Utc::now() + Duration::days(2),
        );

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);
        fixture.bookings.expect_apply_transition().never();

        let err = fixture
            .usecase()
            .decline(Uuid::new_v4(), booking.id, "busy".to_string())
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_booking_computes_vat_and_total() {
        let customer_id = Uuid::new_v4();

        let mut fixture = Fixture::new();
        fixture
            .bookings
            .expect_create()
            .withf(|entity| {
                entity.service_price_minor == 25_000
                    && entity.vat_amount_minor == 3_750
                    && entity.total_amount_minor == 28_750
                    && entity.vat_percentage_bp == 1_500
                    && entity.status == "pending"
                    && entity.booking_number.starts_with("BK-")
            })
            .times(1)
            .returning(move |entity| {
                let mut booking = sample_booking(BookingStatus::Pending, None, entity.scheduled_at);
                booking.customer_id = entity.customer_id;
                booking.service_price_minor = entity.service_price_minor;
                booking.vat_amount_minor = entity.vat_amount_minor;
                booking.vat_percentage_bp = entity.vat_percentage_bp;
                booking.total_amount_minor = entity.total_amount_minor;
                Ok(booking)
            });
        fixture.notifier.expect_notify_status_change().never();

        let result = fixture
            .usecase()
            .create_booking(
                customer_id,
                CreateBookingModel {
                    service_id: Uuid::new_v4(),
                    address_id: Uuid::new_v4(),
                    provider_id: None,
                    scheduled_at: Utc::now() + Duration::days(3),
                    service_price: dec!(250),
                    vat_percentage: dec!(15),
                    currency: "SAR".to_string(),
                    special_instructions: Some("  ".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.vat_amount, dec!(37.50));
        assert_eq!(result.total_amount, dec!(287.50));
        assert_eq!(result.customer_id, customer_id);
    }

    #[tokio::test]
    async fn create_booking_in_the_past_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.bookings.expect_create().never();

        let err = fixture
            .usecase()
            .create_booking(
                Uuid::new_v4(),
                CreateBookingModel {
                    service_id: Uuid::new_v4(),
                    address_id: Uuid::new_v4(),
                    provider_id: None,
                    scheduled_at: Utc::now() - Duration::minutes(5),
                    service_price: dec!(100),
                    vat_percentage: dec!(15),
                    currency: "SAR".to_string(),
                    special_instructions: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn get_booking_hides_booking_from_strangers() {
        let booking = sample_booking(BookingStatus::Pending, None, Utc::now() + Duration::days(1));

        let mut fixture = Fixture::new();
        expect_find(&mut fixture, &booking);

        let usecase = fixture.usecase();
        let err = usecase
            .get_booking(Actor::user(Uuid::new_v4()), booking.id)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);

        let as_admin = usecase
            .get_booking(Actor::admin(Uuid::new_v4()), booking.id)
            .await
            .unwrap();
        assert!(as_admin.settlement.is_none());
    }
}

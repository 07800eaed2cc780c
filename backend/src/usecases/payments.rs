use chrono::Utc;
use crates::{
    domain::{
        entities::{
            bookings::BookingEntity,
            payments::{InsertPaymentEntity, PaymentEntity},
        },
        repositories::{
            bookings::BookingRepository, payments::PaymentRepository,
            webhook_events::WebhookEventRepository,
        },
        services::booking_state_machine,
        value_objects::{
            enums::{
                booking_statuses::BookingStatus, payment_methods::PaymentMethod,
                payment_statuses::PaymentStatus,
            },
            bookings::BookingTransition,
            iam::Actor,
            money::{from_minor, to_minor},
            payments::{
                AdvancePaymentOutcome, CreatePaymentIntentModel, DUPLICATE_CAPTURE_NOTE,
                PaymentDto, PaymentIntentDto, PaymentRefundUpdate, ProcessPaymentModel,
                RecordPaymentOutcome, RefundPaymentModel, WebhookOutcome,
            },
        },
    },
    notifications::NotificationDispatcher,
    payments::gateway::{
        ChargeRequest, CreateIntentRequest, GatewayEvent, GatewayEventKind, PaymentGateway,
        RefundRequest, map_gateway_status,
    },
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::settlement_error::{SettlementError, UseCaseResult};

const GATEWAY_REFUND_REASON: &str = "refunded at payment gateway";

pub struct PaymentUseCase<B, P, W, G, N>
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    booking_repository: Arc<B>,
    payment_repository: Arc<P>,
    webhook_event_repository: Arc<W>,
    gateway: Arc<G>,
    notifier: Arc<N>,
}

impl<B, P, W, G, N> PaymentUseCase<B, P, W, G, N>
where
    B: BookingRepository + Send + Sync + 'static,
    P: PaymentRepository + Send + Sync + 'static,
    W: WebhookEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(
        booking_repository: Arc<B>,
        payment_repository: Arc<P>,
        webhook_event_repository: Arc<W>,
        gateway: Arc<G>,
        notifier: Arc<N>,
    ) -> Self {
        Self {
            booking_repository,
            payment_repository,
            webhook_event_repository,
            gateway,
            notifier,
        }
    }

    pub async fn create_payment_intent(
        &self,
        actor: Actor,
        model: CreatePaymentIntentModel,
    ) -> UseCaseResult<PaymentIntentDto> {
        let booking_id = model.booking_id;
        info!(user_id = %actor.user_id, %booking_id, "payments: create intent requested");

        let booking = self.payable_booking(actor, booking_id).await?;

        let intent = self
            .gateway
            .create_intent(CreateIntentRequest {
                amount_minor: booking.total_amount_minor,
                currency: booking.currency.clone(),
                booking_id,
                customer_id: booking.customer_id,
            })
            .await
            .map_err(|err| {
                error!(%booking_id, error = ?err, "payments: gateway intent creation failed");
                SettlementError::Gateway(err)
            })?;

        let now = Utc::now();
        let attempt = InsertPaymentEntity {
            booking_id,
            amount_minor: booking.total_amount_minor,
            currency: booking.currency.clone(),
            payment_method: PaymentMethod::Card.to_string(),
            status: intent.status.to_string(),
            transaction_id: Some(intent.intent_id.clone()),
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };

        let payment = match self.record(attempt, None).await? {
            RecordPaymentOutcome::Recorded { payment, .. } => payment,
            RecordPaymentOutcome::DuplicateSettled => return Err(SettlementError::AlreadyPaid),
        };

        info!(
            %booking_id,
            payment_id = %payment.id,
            intent_id = %intent.intent_id,
            "payments: payment intent created"
        );

        Ok(PaymentIntentDto {
            payment_id: payment.id,
            intent_id: intent.intent_id,
            client_secret: intent.client_secret,
            amount: from_minor(payment.amount_minor),
            currency: payment.currency,
        })
    }

    /// Charges the customer and records the attempt whatever the outcome. A captured
    /// charge confirms a pending booking in the same transaction as the payment row.
    pub async fn process_payment(
        &self,
        actor: Actor,
        model: ProcessPaymentModel,
    ) -> UseCaseResult<PaymentDto> {
        let booking_id = model.booking_id;
        info!(
            user_id = %actor.user_id,
            %booking_id,
            payment_method = %model.payment_method,
            "payments: process payment requested"
        );

        let booking = self.payable_booking(actor, booking_id).await?;

        let total = from_minor(booking.total_amount_minor);
        if model.amount <= Decimal::ZERO || model.amount > total {
            let err = SettlementError::Validation(format!(
                "amount must be greater than 0 and at most {total}"
            ));
            warn!(
                %booking_id,
                amount = %model.amount,
                status = err.status_code().as_u16(),
                "payments: invalid charge amount"
            );
            return Err(err);
        }
        if model.token.trim().is_empty() {
            return Err(SettlementError::Validation("token is required".to_string()));
        }
        let amount_minor =
            to_minor(model.amount).map_err(|err| SettlementError::Validation(err.to_string()))?;

        let charge = self
            .gateway
            .charge(ChargeRequest {
                amount_minor,
                currency: booking.currency.clone(),
                token: model.token.clone(),
                booking_id,
                idempotency_key: format!("charge-{booking_id}-{}", model.token.trim()),
            })
            .await;

        let now = Utc::now();
        let mut attempt = InsertPaymentEntity {
            booking_id,
            amount_minor,
            currency: booking.currency.clone(),
            payment_method: model.payment_method.to_string(),
            status: PaymentStatus::Failed.to_string(),
            transaction_id: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };

        let charge = match charge {
            Ok(charge) => charge,
            Err(err) => {
                error!(%booking_id, error = ?err, "payments: gateway charge call failed");
                attempt.gateway_response = Some(err.to_string());
                self.record(attempt, None).await?;
                return Err(SettlementError::Gateway(err));
            }
        };

        attempt.status = charge.status.to_string();
        attempt.transaction_id = charge.transaction_id.clone();
        attempt.gateway_response = charge.error_message.clone();

        let confirm_booking = if charge.status == PaymentStatus::Completed {
            booking_state_machine::confirm_by_payment(&booking, now)?
        } else {
            None
        };

        let duplicate = InsertPaymentEntity {
            status: PaymentStatus::Failed.to_string(),
            gateway_response: Some(DUPLICATE_CAPTURE_NOTE.to_string()),
            ..attempt.clone()
        };

        let (payment, booking_confirmed) = match self.record(attempt, confirm_booking).await? {
            RecordPaymentOutcome::Recorded {
                payment,
                booking_confirmed,
            } => (payment, booking_confirmed),
            RecordPaymentOutcome::DuplicateSettled => {
                warn!(
                    %booking_id,
                    transaction_id = ?charge.transaction_id,
                    "payments: charge captured but booking was already paid"
                );
                let payment_id = match self.record(duplicate, None).await? {
                    RecordPaymentOutcome::Recorded { payment, .. } => Some(payment.id),
                    RecordPaymentOutcome::DuplicateSettled => None,
                };
                match charge.transaction_id {
                    Some(transaction_id) => {
                        self.refund_duplicate_capture(payment_id, transaction_id, amount_minor)
                            .await;
                    }
                    None => error!(
                        %booking_id,
                        "payments: duplicate capture has no gateway reference; needs manual refund"
                    ),
                }
                return Err(SettlementError::AlreadyPaid);
            }
        };

        info!(
            %booking_id,
            payment_id = %payment.id,
            payment_status = %payment.status,
            booking_confirmed,
            "payments: charge attempt recorded"
        );

        if booking_confirmed {
            self.notify_confirmed(&booking);
        }

        if charge.status == PaymentStatus::Failed {
            let reason = charge
                .error_message
                .unwrap_or_else(|| "card was declined".to_string());
            let err = SettlementError::PaymentDeclined(reason);
            warn!(
                %booking_id,
                payment_id = %payment.id,
                status = err.status_code().as_u16(),
                "payments: charge declined"
            );
            return Err(err);
        }

        Ok(PaymentDto::from(payment))
    }

    /// Pulls the current status of an open payment from the gateway.
    pub async fn verify_payment(&self, actor: Actor, payment_id: Uuid) -> UseCaseResult<PaymentDto> {
        info!(user_id = %actor.user_id, %payment_id, "payments: verify requested");

        let payment = self.load_payment(payment_id).await?;
        let booking = self.load_booking(payment.booking_id).await?;
        self.ensure_payer(actor, &booking)?;

        let current = payment_status(&payment)?;
        if !current.is_open() {
            debug!(%payment_id, status = %current, "payments: payment already settled; nothing to verify");
            return Ok(PaymentDto::from(payment));
        }

        let transaction_id = payment.transaction_id.clone().ok_or_else(|| {
            SettlementError::Validation("payment has no gateway reference".to_string())
        })?;

        let raw_status = self
            .gateway
            .get_status(transaction_id.clone())
            .await
            .map_err(|err| {
                error!(%payment_id, error = ?err, "payments: gateway status lookup failed");
                SettlementError::Gateway(err)
            })?;
        let next = map_gateway_status(&raw_status);

        if next == current || !current.can_advance_to(next) {
            debug!(%payment_id, gateway_status = %raw_status, "payments: no status change");
            return Ok(PaymentDto::from(payment));
        }

        let confirm_booking = if next == PaymentStatus::Completed {
            booking_state_machine::confirm_by_payment(&booking, Utc::now())?
        } else {
            None
        };
        let confirms = confirm_booking.is_some();

        let outcome = self
            .advance(payment_id, next, Some(raw_status), confirm_booking)
            .await?;
        match outcome {
            AdvancePaymentOutcome::Advanced if confirms => self.notify_confirmed(&booking),
            AdvancePaymentOutcome::Advanced | AdvancePaymentOutcome::Stale => {}
            AdvancePaymentOutcome::DuplicateCapture => {
                self.refund_duplicate_capture(Some(payment_id), transaction_id, payment.amount_minor)
                    .await;
                return Err(SettlementError::AlreadyPaid);
            }
        }

        info!(%payment_id, outcome = ?outcome, next = %next, "payments: payment verified");

        Ok(PaymentDto::from(self.load_payment(payment_id).await?))
    }

    /// Admin refund of a captured payment. Without an amount the whole remaining
    /// balance is refunded.
    pub async fn refund_payment(
        &self,
        actor: Actor,
        payment_id: Uuid,
        model: RefundPaymentModel,
    ) -> UseCaseResult<PaymentDto> {
        info!(user_id = %actor.user_id, %payment_id, "payments: refund requested");

        if !actor.is_admin {
            let err = SettlementError::Forbidden("refunds require the admin role".to_string());
            warn!(
                user_id = %actor.user_id,
                %payment_id,
                status = err.status_code().as_u16(),
                "payments: refund denied"
            );
            return Err(err);
        }

        let reason = model.reason.trim().to_string();
        if reason.is_empty() {
            return Err(SettlementError::Validation("reason is required".to_string()));
        }

        let payment = self.load_payment(payment_id).await?;
        let current = payment_status(&payment)?;
        if !current.is_settled() {
            return Err(SettlementError::Validation(format!(
                "payment in status {current} cannot be refunded"
            )));
        }

        let remaining = payment.amount_minor - payment.refund_amount_minor;
        let refund_minor = match model.amount {
            Some(amount) => {
                to_minor(amount).map_err(|err| SettlementError::Validation(err.to_string()))?
            }
            None => remaining,
        };
        if refund_minor <= 0 || refund_minor > remaining {
            let err = SettlementError::Validation(format!(
                "refund must be greater than 0 and at most {}",
                from_minor(remaining)
            ));
            warn!(
                %payment_id,
                refund_minor,
                remaining,
                status = err.status_code().as_u16(),
                "payments: invalid refund amount"
            );
            return Err(err);
        }

        let transaction_id = payment.transaction_id.clone().ok_or_else(|| {
            SettlementError::Validation("payment has no gateway reference".to_string())
        })?;
        let new_total = payment.refund_amount_minor + refund_minor;

        let result = self
            .gateway
            .refund(RefundRequest {
                transaction_id,
                amount_minor: refund_minor,
                reason: reason.clone(),
                idempotency_key: format!("refund-{payment_id}-{new_total}"),
            })
            .await
            .map_err(|err| {
                error!(%payment_id, error = ?err, "payments: gateway refund call failed");
                SettlementError::Gateway(err)
            })?;

        if !result.is_accepted() {
            let message = result
                .error_message
                .unwrap_or_else(|| "refund was not accepted".to_string());
            warn!(%payment_id, gateway_error = %message, "payments: gateway rejected refund");
            return Err(SettlementError::RefundRejected(message));
        }

        let update = PaymentRefundUpdate {
            payment_id,
            expected_status: current,
            expected_refund_minor: payment.refund_amount_minor,
            status: if new_total == payment.amount_minor {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            },
            refund_amount_minor: new_total,
            refunded_at: Utc::now(),
            refund_reason: reason,
            gateway_response: result.refund_id,
        };

        let applied = self
            .payment_repository
            .apply_refund(update)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to record refund");
                SettlementError::Internal(err)
            })?;
        if !applied {
            error!(
                %payment_id,
                refund_minor,
                "payments: refund accepted by gateway but payment changed concurrently"
            );
            return Err(SettlementError::ConcurrentModification);
        }

        info!(%payment_id, refund_minor, new_total, "payments: refund recorded");

        Ok(PaymentDto::from(self.load_payment(payment_id).await?))
    }

    /// Verifies and applies a gateway callback at most once per event id. The claim is
    /// released when applying fails so the gateway's retry gets another chance.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> UseCaseResult<WebhookOutcome> {
        let event = self
            .gateway
            .verify_webhook(payload, signature)
            .map_err(|err| {
                let err = SettlementError::InvalidWebhook(err.to_string());
                warn!(
                    payload_len = payload.len(),
                    error = %err,
                    status = err.status_code().as_u16(),
                    "payments: webhook verification failed"
                );
                err
            })?;

        info!(event_id = %event.id, event_type = %event.event_type, "payments: webhook verified");

        let claimed = self
            .webhook_event_repository
            .try_claim(event.id.clone(), event.event_type.clone())
            .await
            .map_err(|err| {
                error!(event_id = %event.id, db_error = ?err, "payments: failed to claim webhook event");
                SettlementError::Internal(err)
            })?;
        if !claimed {
            info!(event_id = %event.id, "payments: duplicate webhook delivery ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply_webhook_event(&event).await {
            Ok(outcome) => {
                info!(event_id = %event.id, outcome = ?outcome, "payments: webhook processed");
                Ok(outcome)
            }
            Err(err) => {
                error!(event_id = %event.id, error = %err, "payments: webhook processing failed");
                if let Err(release_err) = self
                    .webhook_event_repository
                    .release(event.id.clone())
                    .await
                {
                    error!(
                        event_id = %event.id,
                        db_error = ?release_err,
                        "payments: failed to release webhook claim"
                    );
                }
                Err(err)
            }
        }
    }

    async fn apply_webhook_event(&self, event: &GatewayEvent) -> UseCaseResult<WebhookOutcome> {
        if let GatewayEventKind::Other(kind) = &event.kind {
            debug!(event_type = %kind, "payments: unhandled webhook event type");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(transaction_id) = event.transaction_id.clone() else {
            warn!(event_id = %event.id, "payments: webhook event without transaction id");
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(payment) = self
            .payment_repository
            .find_by_transaction_id(transaction_id.clone())
            .await
            .map_err(SettlementError::Internal)?
        else {
            warn!(event_id = %event.id, %transaction_id, "payments: webhook for unknown payment");
            return Ok(WebhookOutcome::Ignored);
        };

        let current = payment_status(&payment)?;

        match &event.kind {
            GatewayEventKind::PaymentSucceeded | GatewayEventKind::PaymentFailed => {
                let next = if event.kind == GatewayEventKind::PaymentSucceeded {
                    PaymentStatus::Completed
                } else {
                    PaymentStatus::Failed
                };

                if !current.is_open() {
                    debug!(payment_id = %payment.id, current = %current, next = %next, "payments: stale webhook");
                    return Ok(WebhookOutcome::Stale);
                }

                let booking = self.load_booking(payment.booking_id).await?;
                let confirm_booking = if next == PaymentStatus::Completed {
                    booking_state_machine::confirm_by_payment(&booking, Utc::now())?
                } else {
                    None
                };
                let confirms = confirm_booking.is_some();

                let response = event
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| event.event_type.clone());
                match self
                    .advance(payment.id, next, Some(response), confirm_booking)
                    .await?
                {
                    AdvancePaymentOutcome::Advanced => {
                        if confirms {
                            self.notify_confirmed(&booking);
                        }
                        Ok(WebhookOutcome::Applied)
                    }
                    AdvancePaymentOutcome::Stale => Ok(WebhookOutcome::Stale),
                    AdvancePaymentOutcome::DuplicateCapture => {
                        self.refund_duplicate_capture(
                            Some(payment.id),
                            transaction_id,
                            payment.amount_minor,
                        )
                        .await;
                        Ok(WebhookOutcome::Stale)
                    }
                }
            }
            GatewayEventKind::ChargeRefunded => {
                let Some(amount_refunded) = event.amount_refunded_minor else {
                    return Ok(WebhookOutcome::Ignored);
                };
                if !current.is_settled() || amount_refunded <= payment.refund_amount_minor {
                    return Ok(WebhookOutcome::Stale);
                }

                let new_total = amount_refunded.min(payment.amount_minor);
                let update = PaymentRefundUpdate {
                    payment_id: payment.id,
                    expected_status: current,
                    expected_refund_minor: payment.refund_amount_minor,
                    status: if new_total == payment.amount_minor {
                        PaymentStatus::Refunded
                    } else {
                        PaymentStatus::PartiallyRefunded
                    },
                    refund_amount_minor: new_total,
                    refunded_at: Utc::now(),
                    refund_reason: GATEWAY_REFUND_REASON.to_string(),
                    gateway_response: Some(event.event_type.clone()),
                };

                let applied = self
                    .payment_repository
                    .apply_refund(update)
                    .await
                    .map_err(SettlementError::Internal)?;

                Ok(if applied {
                    WebhookOutcome::Applied
                } else {
                    WebhookOutcome::Stale
                })
            }
            GatewayEventKind::Other(_) => Ok(WebhookOutcome::Ignored),
        }
    }

    /// Loads the booking and checks that `actor` may pay for it now.
    async fn payable_booking(&self, actor: Actor, booking_id: Uuid) -> UseCaseResult<BookingEntity> {
        let booking = self.load_booking(booking_id).await?;
        self.ensure_payer(actor, &booking)?;

        let accepts_payment = BookingStatus::from_str(&booking.status)
            .is_some_and(|status| status.accepts_payment());
        if !accepts_payment {
            let err = SettlementError::Validation(format!(
                "booking in status {} cannot be paid",
                booking.status
            ));
            warn!(
                %booking_id,
                status = err.status_code().as_u16(),
                "payments: booking not payable"
            );
            return Err(err);
        }

        let settled = self
            .payment_repository
            .find_settled_by_booking(booking_id)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "payments: failed to check existing payment");
                SettlementError::Internal(err)
            })?;
        if let Some(existing) = settled {
            let err = SettlementError::AlreadyPaid;
            warn!(
                %booking_id,
                payment_id = %existing.id,
                status = err.status_code().as_u16(),
                "payments: booking already paid"
            );
            return Err(err);
        }

        Ok(booking)
    }

    fn ensure_payer(&self, actor: Actor, booking: &BookingEntity) -> UseCaseResult<()> {
        if actor.is_admin || booking.customer_id == actor.user_id {
            return Ok(());
        }

        let err = SettlementError::Forbidden("booking belongs to another customer".to_string());
        warn!(
            user_id = %actor.user_id,
            booking_id = %booking.id,
            status = err.status_code().as_u16(),
            "payments: payer mismatch"
        );
        Err(err)
    }

    async fn record(
        &self,
        attempt: InsertPaymentEntity,
        confirm_booking: Option<BookingTransition>,
    ) -> UseCaseResult<RecordPaymentOutcome> {
        let booking_id = attempt.booking_id;
        self.payment_repository
            .record_attempt(attempt, confirm_booking)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "payments: failed to record payment attempt");
                SettlementError::Internal(err)
            })
    }

    async fn advance(
        &self,
        payment_id: Uuid,
        next: PaymentStatus,
        gateway_response: Option<String>,
        confirm_booking: Option<BookingTransition>,
    ) -> UseCaseResult<AdvancePaymentOutcome> {
        self.payment_repository
            .advance_status(
                payment_id,
                vec![PaymentStatus::Pending, PaymentStatus::Processing],
                next,
                gateway_response,
                confirm_booking,
            )
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to advance payment");
                SettlementError::Internal(err)
            })
    }

    /// Hands back money captured for a booking that another payment had already
    /// settled. Failures are logged for manual follow-up, never surfaced.
    async fn refund_duplicate_capture(
        &self,
        payment_id: Option<Uuid>,
        transaction_id: String,
        amount_minor: i64,
    ) {
        let request = RefundRequest {
            transaction_id: transaction_id.clone(),
            amount_minor,
            reason: DUPLICATE_CAPTURE_NOTE.to_string(),
            idempotency_key: format!("duplicate-{transaction_id}"),
        };

        match self.gateway.refund(request).await {
            Ok(result) if result.is_accepted() => info!(
                payment_id = ?payment_id,
                %transaction_id,
                amount_minor,
                refund_id = ?result.refund_id,
                "payments: duplicate capture refunded"
            ),
            Ok(result) => error!(
                payment_id = ?payment_id,
                %transaction_id,
                amount_minor,
                gateway_error = ?result.error_message,
                "payments: gateway rejected duplicate capture refund; needs manual refund"
            ),
            Err(err) => error!(
                payment_id = ?payment_id,
                %transaction_id,
                amount_minor,
                error = ?err,
                "payments: duplicate capture refund failed; needs manual refund"
            ),
        }
    }

    async fn load_payment(&self, payment_id: Uuid) -> UseCaseResult<PaymentEntity> {
        self.payment_repository
            .find_by_id(payment_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to load payment");
                SettlementError::Internal(err)
            })?
            .ok_or(SettlementError::NotFound("payment"))
    }

    async fn load_booking(&self, booking_id: Uuid) -> UseCaseResult<BookingEntity> {
        self.booking_repository
            .find_by_id(booking_id)
            .await
            .map_err(|err| {
                error!(%booking_id, db_error = ?err, "payments: failed to load booking");
                SettlementError::Internal(err)
            })?
            .ok_or(SettlementError::NotFound("booking"))
    }

    fn notify_confirmed(&self, booking: &BookingEntity) {
        self.notifier
            .notify_status_change(booking.customer_id, booking.id, BookingStatus::Confirmed);
        if let Some(provider_id) = booking.provider_id {
            self.notifier
                .notify_status_change(provider_id, booking.id, BookingStatus::Confirmed);
        }
    }
}

pub(crate) fn payment_status(payment: &PaymentEntity) -> UseCaseResult<PaymentStatus> {
    PaymentStatus::from_str(&payment.status).ok_or_else(|| {
        SettlementError::Internal(anyhow::anyhow!(
            "payment {} has unrecognised status {:?}",
            payment.id,
            payment.status
        ))
    })
}

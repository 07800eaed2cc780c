use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, warn};

use super::gateway::{
    ChargeRequest, ChargeResult, CreateIntentRequest, CreatedIntent, GatewayEvent,
    GatewayEventKind, PaymentGateway, RefundRequest, RefundResult, map_gateway_status,
    map_refund_status,
};
use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
    webhook_tolerance_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    client_secret: Option<String>,
    last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCharge {
    payment_intent: Option<String>,
    amount_refunded: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: Option<String>,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    decline_code: Option<String>,
    payment_intent: Option<StripeIntentRef>,
}

#[derive(Debug, Deserialize)]
struct StripeIntentRef {
    id: String,
}

/// A non-2xx Stripe response, kept parsed so callers can tell declines from outages.
struct StripeFailure {
    status: reqwest::StatusCode,
    details: Option<StripeErrorDetails>,
}

impl StripeFailure {
    fn is_card_error(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|d| d.type_.as_deref())
            .is_some_and(|t| t == "card_error")
    }

    fn message(&self) -> String {
        self.details
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| format!("stripe request failed with status {}", self.status))
    }
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        api_base: String,
        webhook_tolerance_secs: i64,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
            webhook_tolerance_secs,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn post_form(
        &self,
        path: &str,
        body: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<std::result::Result<reqwest::Response, StripeFailure>> {
        let mut request = self
            .http
            .post(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let resp = request.send().await?;
        Ok(Self::check_status(resp, path).await)
    }

    async fn check_status(
        resp: reqwest::Response,
        context: &str,
    ) -> std::result::Result<reqwest::Response, StripeFailure> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.clone()),
            stripe_decline_code = ?details.as_ref().and_then(|d| d.decline_code.clone()),
            context = %context,
            "stripe api request failed"
        );

        Err(StripeFailure { status, details })
    }

    /// Creates a PaymentIntent the client confirms with its publishable key.
    pub async fn create_payment_intent(&self, request: &CreateIntentRequest) -> Result<CreatedIntent> {
        // https://stripe.com/docs/api/payment_intents/create
        let body = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
            ("metadata[booking_id]".to_string(), request.booking_id.to_string()),
            ("metadata[customer_id]".to_string(), request.customer_id.to_string()),
        ];

        let resp = self
            .post_form("/v1/payment_intents", &body, None)
            .await?
            .map_err(|failure| anyhow!("create payment intent: {}", failure.message()))?;
        let intent: StripePaymentIntent = resp.json().await?;

        Ok(CreatedIntent {
            client_secret: intent
                .client_secret
                .ok_or_else(|| anyhow!("Stripe payment intent client_secret is missing"))?,
            status: map_gateway_status(&intent.status),
            intent_id: intent.id,
        })
    }

    /// Creates and confirms a PaymentIntent server-side with a tokenised payment method.
    pub async fn confirm_payment(&self, request: &ChargeRequest) -> Result<ChargeResult> {
        let body = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("payment_method".to_string(), request.token.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
            ("automatic_payment_methods[allow_redirects]".to_string(), "never".to_string()),
            ("metadata[booking_id]".to_string(), request.booking_id.to_string()),
        ];

        match self
            .post_form("/v1/payment_intents", &body, Some(&request.idempotency_key))
            .await?
        {
            Ok(resp) => {
                let intent: StripePaymentIntent = resp.json().await?;
                let status = map_gateway_status(&intent.status);
                Ok(ChargeResult {
                    error_message: intent
                        .last_payment_error
                        .and_then(|e| e.message)
                        .filter(|_| status == PaymentStatus::Failed),
                    transaction_id: Some(intent.id),
                    status,
                })
            }
            Err(failure) if failure.is_card_error() => Ok(ChargeResult {
                transaction_id: failure
                    .details
                    .as_ref()
                    .and_then(|d| d.payment_intent.as_ref())
                    .map(|intent| intent.id.clone()),
                status: PaymentStatus::Failed,
                error_message: Some(failure.message()),
            }),
            Err(failure) => Err(anyhow!("confirm payment: {}", failure.message())),
        }
    }

    pub async fn retrieve_payment_intent_status(&self, intent_id: &str) -> Result<String> {
        // https://stripe.com/docs/api/payment_intents/retrieve
        let resp = self
            .http
            .get(self.url(&format!("/v1/payment_intents/{intent_id}")))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;
        let resp = Self::check_status(resp, "retrieve payment intent")
            .await
            .map_err(|failure| anyhow!("retrieve payment intent: {}", failure.message()))?;

        let intent: StripePaymentIntent = resp.json().await?;
        Ok(intent.status)
    }

    pub async fn create_refund(&self, request: &RefundRequest) -> Result<RefundResult> {
        // https://stripe.com/docs/api/refunds/create
        let body = vec![
            ("payment_intent".to_string(), request.transaction_id.clone()),
            ("amount".to_string(), request.amount_minor.to_string()),
            ("reason".to_string(), "requested_by_customer".to_string()),
            ("metadata[reason]".to_string(), request.reason.clone()),
        ];

        match self
            .post_form("/v1/refunds", &body, Some(&request.idempotency_key))
            .await?
        {
            Ok(resp) => {
                let refund: StripeRefund = resp.json().await?;
                let status = map_refund_status(refund.status.as_deref().unwrap_or("pending"));
                Ok(RefundResult {
                    refund_id: Some(refund.id),
                    status,
                    error_message: refund.failure_reason,
                })
            }
            Err(failure) if failure.status.is_client_error() => Ok(RefundResult {
                refund_id: None,
                status: super::gateway::RefundStatus::Failed,
                error_message: Some(failure.message()),
            }),
            Err(failure) => Err(anyhow!("create refund: {}", failure.message())),
        }
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        self.verify_webhook_signature_at(payload, signature_header, Utc::now().timestamp())
    }

    fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<StripeEvent> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = rest.parse().ok();
            } else if let Some(rest) = part.strip_prefix("v1=") {
                if let Ok(bytes) = hex::decode(rest) {
                    signatures.push(bytes);
                }
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow!("missing timestamp in stripe-signature"))?;
        if signatures.is_empty() {
            anyhow::bail!("missing v1 in stripe-signature");
        }
        if (now - timestamp).abs() > self.webhook_tolerance_secs {
            anyhow::bail!("stripe-signature timestamp outside tolerance");
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|err| anyhow!("invalid webhook secret: {err}"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }

    pub fn to_gateway_event(event: StripeEvent) -> Result<GatewayEvent> {
        let id = event
            .id
            .clone()
            .ok_or_else(|| anyhow!("stripe event is missing its id"))?;

        let mut gateway_event = GatewayEvent {
            id,
            event_type: event.type_.clone(),
            kind: GatewayEventKind::Other(event.type_.clone()),
            transaction_id: None,
            amount_refunded_minor: None,
            failure_message: None,
        };

        match event.type_.as_str() {
            "payment_intent.succeeded" | "payment_intent.payment_failed" => {
                let intent: StripePaymentIntent = serde_json::from_value(event.data.object)?;
                gateway_event.kind = if event.type_ == "payment_intent.succeeded" {
                    GatewayEventKind::PaymentSucceeded
                } else {
                    GatewayEventKind::PaymentFailed
                };
                gateway_event.failure_message = intent.last_payment_error.and_then(|e| e.message);
                gateway_event.transaction_id = Some(intent.id);
            }
            "charge.refunded" => {
                let charge: StripeCharge = serde_json::from_value(event.data.object)?;
                gateway_event.kind = GatewayEventKind::ChargeRefunded;
                gateway_event.transaction_id = charge.payment_intent;
                gateway_event.amount_refunded_minor = charge.amount_refunded;
            }
            other => {
                warn!(event_type = %other, "stripe: event type not used for settlement");
            }
        }

        Ok(gateway_event)
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_intent(&self, request: CreateIntentRequest) -> Result<CreatedIntent> {
        self.create_payment_intent(&request).await
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResult> {
        self.confirm_payment(&request).await
    }

    async fn get_status(&self, transaction_id: String) -> Result<String> {
        self.retrieve_payment_intent_status(&transaction_id).await
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundResult> {
        self.create_refund(&request).await
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent> {
        let event = self.verify_webhook_signature(payload, signature)?;
        Self::to_gateway_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn client() -> StripeClient {
        StripeClient::new(
            "sk_test".to_string(),
            SECRET.to_string(),
            DEFAULT_API_BASE.to_string(),
            300,
        )
    }

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn succeeded_payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_760_000_000,
            "data": { "object": { "id": "pi_123", "status": "succeeded" } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let payload = succeeded_payload();
        let now = 1_760_000_100;

        let event = client()
            .verify_webhook_signature_at(&payload, &sign(&payload, now), now)
            .unwrap();
        let event = StripeClient::to_gateway_event(event).unwrap();

        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind, GatewayEventKind::PaymentSucceeded);
        assert_eq!(event.transaction_id.as_deref(), Some("pi_123"));
    }

    #[test]
    fn rejects_tampered_payloads() {
        let payload = succeeded_payload();
        let now = 1_760_000_100;
        let header = sign(&payload, now);
        let tampered = String::from_utf8(payload).unwrap().replace("pi_123", "pi_999");

        let result = client().verify_webhook_signature_at(tampered.as_bytes(), &header, now);

        assert!(result.is_err());
    }

    #[test]
    fn rejects_stale_signatures() {
        let payload = succeeded_payload();
        let signed_at = 1_760_000_000;

        let result =
            client().verify_webhook_signature_at(&payload, &sign(&payload, signed_at), signed_at + 301);

        assert!(result.is_err());
    }

    #[test]
    fn rejects_headers_without_signature() {
        let payload = succeeded_payload();

        assert!(client()
            .verify_webhook_signature_at(&payload, "t=1760000000", 1_760_000_000)
            .is_err());
    }

    #[test]
    fn extracts_refund_totals_from_charge_events() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "payment_intent": "pi_123", "amount_refunded": 5000 } }
        }))
        .unwrap();

        let event = StripeClient::to_gateway_event(event).unwrap();

        assert_eq!(event.kind, GatewayEventKind::ChargeRefunded);
        assert_eq!(event.transaction_id.as_deref(), Some("pi_123"));
        assert_eq!(event.amount_refunded_minor, Some(5000));
    }

    #[test]
    fn keeps_unrelated_events_as_other() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_3",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        }))
        .unwrap();

        let event = StripeClient::to_gateway_event(event).unwrap();

        assert_eq!(event.kind, GatewayEventKind::Other("customer.created".to_string()));
    }
}

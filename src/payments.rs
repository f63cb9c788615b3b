//! Checkout-session client and webhook signature verification for the
//! payment provider (Stripe wire format).

use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Everything the provider needs to price and label one tour purchase.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tour_id: Uuid,
    pub tour_name: String,
    pub summary: String,
    pub image_url: String,
    pub price: f64,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Provider amounts are integer cents.
    pub fn unit_amount(&self) -> i64 {
        (self.price * 100.0).round() as i64
    }

    fn form_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("payment_method_types[0]", "card".into()),
            ("mode", "payment".into()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("customer_email", self.customer_email.clone()),
            ("client_reference_id", self.tour_id.to_string()),
            ("line_items[0][price_data][currency]", "usd".into()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("{} Tour", self.tour_name),
            ),
            (
                "line_items[0][price_data][product_data][description]",
                self.summary.clone(),
            ),
            (
                "line_items[0][price_data][product_data][images][0]",
                self.image_url.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                self.unit_amount().to_string(),
            ),
            ("line_items[0][quantity]", "1".into()),
        ]
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> anyhow::Result<serde_json::Value>;
}

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(cfg: &StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: cfg.secret_key.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> anyhow::Result<serde_json::Value> {
        let body = serde_urlencoded::to_string(req.form_pairs()).context("encode checkout form")?;
        let session = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .context("checkout session request")?
            .error_for_status()
            .context("checkout session rejected")?
            .json::<serde_json::Value>()
            .await
            .context("decode checkout session")?;
        debug!(tour_id = %req.tour_id, "checkout session created");
        Ok(session)
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("malformed signature header")]
    Malformed,
    #[error("no signatures found matching the expected signature for payload")]
    Mismatch,
    #[error("timestamp outside the tolerance zone")]
    Expired,
    #[error("unusable signing secret")]
    Secret,
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// The parts of a completed checkout session a booking is built from.
#[derive(Debug, Deserialize)]
pub struct CompletedCheckout {
    pub client_reference_id: Option<String>,
    pub customer_email: Option<String>,
    pub amount_total: Option<i64>,
}

impl CompletedCheckout {
    pub fn price(&self) -> Option<f64> {
        self.amount_total.map(|cents| cents as f64 / 100.0)
    }
}

/// Verifies `t=<unix>,v1=<hex hmac>` signature headers over `"{t}.{payload}"`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs: 300,
        }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<WebhookEvent, WebhookError> {
        self.verify_at(payload, header, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<WebhookEvent, WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;
        let mut timestamp: Option<&str> = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = Some(v),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::Malformed)?;
        let ts: i64 = timestamp.parse().map_err(|_| WebhookError::Malformed)?;
        if signatures.is_empty() {
            return Err(WebhookError::Malformed);
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|sig| {
            let Ok(raw) = hex::decode(sig) else {
                return false;
            };
            mac.clone().verify_slice(&raw).is_ok()
        });
        if !matched {
            return Err(WebhookError::Mismatch);
        }
        if (now - ts).abs() > self.tolerance_secs {
            return Err(WebhookError::Expired);
        }
        Ok(serde_json::from_slice(payload)?)
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| WebhookError::Secret)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Produces a header value the way the provider would; used by tests and local tooling.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let ts = timestamp.to_string();
        let sig = hex::encode(self.mac(&ts, payload)?.finalize().into_bytes());
        Ok(format!("t={ts},v1={sig}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"type":"checkout.session.completed","data":{"object":{"client_reference_id":"5c88fa8cf4afda39709c2951","customer_email":"leo@example.io","amount_total":49700}}}"#;

    #[test]
    fn accepts_valid_signature() {
        let verifier = WebhookVerifier::new("whsec_test");
        let header = verifier.sign(PAYLOAD, 1_700_000_000).unwrap();
        let event = verifier
            .verify_at(PAYLOAD, Some(&header), 1_700_000_010)
            .expect("valid signature");
        assert_eq!(event.kind, "checkout.session.completed");
        let checkout: CompletedCheckout =
            serde_json::from_value(event.data.object).expect("checkout object");
        assert_eq!(checkout.customer_email.as_deref(), Some("leo@example.io"));
        assert_eq!(checkout.price(), Some(497.0));
    }

    #[test]
    fn rejects_wrong_secret_and_tampered_payload() {
        let signer = WebhookVerifier::new("whsec_other");
        let verifier = WebhookVerifier::new("whsec_test");
        let header = signer.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert!(matches!(
            verifier.verify_at(PAYLOAD, Some(&header), 1_700_000_000),
            Err(WebhookError::Mismatch)
        ));

        let header = verifier.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert!(matches!(
            verifier.verify_at(b"{}", Some(&header), 1_700_000_000),
            Err(WebhookError::Mismatch)
        ));
    }

    #[test]
    fn rejects_stale_or_malformed_headers() {
        let verifier = WebhookVerifier::new("whsec_test");
        let header = verifier.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert!(matches!(
            verifier.verify_at(PAYLOAD, Some(&header), 1_700_001_000),
            Err(WebhookError::Expired)
        ));
        assert!(matches!(
            verifier.verify_at(PAYLOAD, None, 0),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verifier.verify_at(PAYLOAD, Some("v1=abcd"), 0),
            Err(WebhookError::Malformed)
        ));
        assert!(matches!(
            verifier.verify_at(PAYLOAD, Some("t=1,v1=zz"), 1),
            Err(WebhookError::Mismatch)
        ));
    }

    #[test]
    fn unset_secret_still_signs_and_verifies() {
        let verifier = WebhookVerifier::new("");
        let header = verifier.sign(PAYLOAD, 1_700_000_000).unwrap();
        assert!(verifier
            .verify_at(PAYLOAD, Some(&header), 1_700_000_000)
            .is_ok());
    }

    #[test]
    fn checkout_form_uses_cents() {
        let req = CheckoutRequest {
            tour_id: Uuid::nil(),
            tour_name: "The Forest Hiker".into(),
            summary: "Breathtaking hike".into(),
            image_url: "http://localhost/img/tours/tour-1-cover.jpg".into(),
            price: 397.5,
            customer_email: "leo@example.io".into(),
            success_url: "http://localhost/my-tours".into(),
            cancel_url: "http://localhost/tour/the-forest-hiker".into(),
        };
        assert_eq!(req.unit_amount(), 39750);
        let pairs = req.form_pairs();
        assert!(pairs
            .iter()
            .any(|(k, v)| *k == "line_items[0][price_data][product_data][name]"
                && v == "The Forest Hiker Tour"));
        let encoded = serde_urlencoded::to_string(pairs).expect("encode");
        assert!(encoded.contains("mode=payment"));
    }
}

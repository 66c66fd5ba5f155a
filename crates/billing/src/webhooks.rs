//! Billing webhook verification and reconciliation
//!
//! Events are applied by overwriting local state from the billing service, so
//! replaying an event converges on the same record and no idempotency table is
//! kept.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use listwise_shared::{SubscriptionPatch, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::gateway::BillingGateway;
use crate::subscriptions::SubscriptionStore;
use crate::timeout::{bounded, CallTimeouts};

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted on a signed payload, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook envelope `{id, type, data: {object}}`
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl BillingEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// `data.object.id`
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

/// Event kinds the reconciler acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    PaymentSucceeded,
    PaymentFailed,
    Unknown,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => EventKind::PaymentSucceeded,
            "invoice.payment_failed" => EventKind::PaymentFailed,
            _ => EventKind::Unknown,
        }
    }

    pub fn action(&self) -> Option<&'static str> {
        match self {
            EventKind::SubscriptionCreated => Some("subscription_created"),
            EventKind::SubscriptionUpdated => Some("subscription_updated"),
            EventKind::SubscriptionDeleted => Some("subscription_deleted"),
            EventKind::PaymentSucceeded => Some("payment_succeeded"),
            EventKind::PaymentFailed => Some("payment_failed"),
            EventKind::Unknown => None,
        }
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

impl WebhookOutcome {
    fn unhandled() -> Self {
        Self {
            handled: false,
            action: None,
            subscription_external_id: None,
            invoice_id: None,
        }
    }
}

/// Build a `t=...,v1=...` signature header for `payload`.
pub fn sign_payload(secret: &str, payload: &str, timestamp: i64) -> BillingResult<String> {
    let key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret key".to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Clone)]
pub struct WebhookReconciler {
    subscriptions: SubscriptionStore,
    gateway: Arc<dyn BillingGateway>,
    webhook_secret: String,
    timeouts: CallTimeouts,
}

impl WebhookReconciler {
    pub fn new(
        subscriptions: SubscriptionStore,
        gateway: Arc<dyn BillingGateway>,
        webhook_secret: String,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            subscriptions,
            gateway,
            webhook_secret,
            timeouts,
        }
    }

    /// Verify the signature header and parse the event.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<BillingEvent> {
        self.verify_event_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn verify_event_at(&self, payload: &str, signature: &str, now: i64) -> BillingResult<BillingEvent> {
        if self.webhook_secret.is_empty() {
            return Err(BillingError::Config(
                "webhook signing secret not configured".to_string(),
            ));
        }

        // t=timestamp,v1=signature[,v0=...]
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures: Vec<&str> = Vec::new();
        for part in signature.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = value.parse().ok(),
                    "v1" => v1_signatures.push(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in webhook signature header");
            BillingError::WebhookSignatureInvalid
        })?;
        if v1_signatures.is_empty() {
            tracing::warn!("Missing v1 signature in webhook signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let matched = v1_signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
                return false;
            };
            mac.update(signed_payload.as_bytes());
            mac.verify_slice(&expected).is_ok()
        });
        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: BillingEvent = serde_json::from_str(payload)
            .map_err(|e| BillingError::WebhookPayload(e.to_string()))?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook signature verified"
        );
        Ok(event)
    }

    /// Apply a verified event to local subscription state.
    pub async fn handle_event(&self, event: &BillingEvent) -> BillingResult<WebhookOutcome> {
        let kind = event.kind();
        let Some(action) = kind.action() else {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Ignoring unhandled webhook event type"
            );
            return Ok(WebhookOutcome::unhandled());
        };

        let object_id = event
            .object_id()
            .ok_or_else(|| BillingError::WebhookPayload("data.object.id missing".to_string()))?
            .to_string();

        let mut outcome = WebhookOutcome {
            handled: true,
            action: Some(action.to_string()),
            subscription_external_id: None,
            invoice_id: None,
        };

        match kind {
            EventKind::SubscriptionCreated => {
                tracing::info!(subscription_id = %object_id, "Billing subscription created");
                outcome.subscription_external_id = Some(object_id);
            }
            EventKind::SubscriptionUpdated => {
                self.sync_from_gateway(&object_id).await?;
                outcome.subscription_external_id = Some(object_id);
            }
            EventKind::SubscriptionDeleted => {
                self.mark_cancelled(&object_id).await?;
                outcome.subscription_external_id = Some(object_id);
            }
            EventKind::PaymentSucceeded => {
                tracing::info!(invoice_id = %object_id, "Invoice payment succeeded");
                outcome.invoice_id = Some(object_id);
            }
            EventKind::PaymentFailed => {
                tracing::warn!(invoice_id = %object_id, "Invoice payment failed");
                outcome.invoice_id = Some(object_id);
            }
            EventKind::Unknown => return Ok(WebhookOutcome::unhandled()),
        }

        Ok(outcome)
    }

    async fn sync_from_gateway(&self, external_id: &str) -> BillingResult<()> {
        let Some(local) = self.subscriptions.find_by_billing_ref(external_id).await? else {
            tracing::warn!(
                subscription_id = %external_id,
                "Update for unknown subscription, nothing to reconcile"
            );
            return Ok(());
        };

        let external = bounded(self.timeouts.billing, "billing.fetch_subscription", async {
            self.gateway.fetch_subscription(external_id).await
        })
        .await
        .inspect_err(|e| {
            tracing::error!(
                subscription_id = %external_id,
                error = %e,
                "Failed to fetch subscription during reconciliation"
            );
        })?;

        self.subscriptions
            .update(
                local.id,
                SubscriptionPatch {
                    status: Some(external.status),
                    current_period_start: Some(external.current_period_start),
                    current_period_end: Some(external.current_period_end),
                    cancel_at_period_end: Some(external.cancel_at_period_end),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %external_id,
            status = %external.status,
            "Reconciled subscription from billing service"
        );
        Ok(())
    }

    async fn mark_cancelled(&self, external_id: &str) -> BillingResult<()> {
        let Some(local) = self.subscriptions.find_by_billing_ref(external_id).await? else {
            tracing::warn!(
                subscription_id = %external_id,
                "Deletion for unknown subscription, nothing to reconcile"
            );
            return Ok(());
        };

        self.subscriptions
            .update(
                local.id,
                SubscriptionPatch {
                    status: Some(SubscriptionStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %external_id,
            user_id = %local.user_id,
            "Subscription cancelled by billing service"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OfflineGateway;

    const SECRET: &str = "whsec_test_secret";

    fn reconciler() -> WebhookReconciler {
        let store = listwise_shared::Datastore::in_memory();
        WebhookReconciler::new(
            SubscriptionStore::new(store.subscriptions, CallTimeouts::default()),
            Arc::new(OfflineGateway::new()),
            SECRET.to_string(),
            CallTimeouts::default(),
        )
    }

    const PAYLOAD: &str =
        r#"{"id":"evt_1","type":"customer.subscription.deleted","data":{"object":{"id":"sub_123"}}}"#;

    #[test]
    fn test_verify_accepts_valid_signature() {
        let now = 1_700_000_000;
        let header = sign_payload(SECRET, PAYLOAD, now).unwrap();
        let event = reconciler().verify_event_at(PAYLOAD, &header, now + 10).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.kind(), EventKind::SubscriptionDeleted);
        assert_eq!(event.object_id(), Some("sub_123"));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let now = 1_700_000_000;
        let header = sign_payload(SECRET, PAYLOAD, now).unwrap();
        let tampered = PAYLOAD.replace("sub_123", "sub_999");
        let err = reconciler().verify_event_at(&tampered, &header, now).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let now = 1_700_000_000;
        let header = sign_payload(SECRET, PAYLOAD, now - SIGNATURE_TOLERANCE_SECS - 1).unwrap();
        let err = reconciler().verify_event_at(PAYLOAD, &header, now).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        let err = reconciler()
            .verify_event_at(PAYLOAD, "v1=deadbeef", 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_verify_refuses_without_secret() {
        let store = listwise_shared::Datastore::in_memory();
        let reconciler = WebhookReconciler::new(
            SubscriptionStore::new(store.subscriptions, CallTimeouts::default()),
            Arc::new(OfflineGateway::new()),
            String::new(),
            CallTimeouts::default(),
        );
        let header = sign_payload("", PAYLOAD, 1_700_000_000).unwrap();
        let err = reconciler
            .verify_event_at(PAYLOAD, &header, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_event_not_handled() {
        let event: BillingEvent = serde_json::from_str(
            r#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#,
        )
        .unwrap();
        let outcome = reconciler().handle_event(&event).await.unwrap();
        assert!(!outcome.handled);
        assert!(outcome.action.is_none());
    }

    #[tokio::test]
    async fn test_payment_failed_reports_invoice() {
        let event: BillingEvent = serde_json::from_str(
            r#"{"id":"evt_3","type":"invoice.payment_failed","data":{"object":{"id":"in_1"}}}"#,
        )
        .unwrap();
        let outcome = reconciler().handle_event(&event).await.unwrap();
        assert!(outcome.handled);
        assert_eq!(outcome.action.as_deref(), Some("payment_failed"));
        assert_eq!(outcome.invoice_id.as_deref(), Some("in_1"));
    }
}

//! Payment decision adapter and the gateways the coordinator calls it through.

use async_trait::async_trait;
use common::{LineItem, OrderId, now_millis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header a caller sets to force the payment outcome.
pub const FORCE_HEADER: &str = "X-Force-Payment";

/// A forced payment outcome, used for demos and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceOutcome {
    Success,
    Fail,
}

impl ForceOutcome {
    /// Parses `success` / `fail`, ignoring case. Anything else means no force.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(ForceOutcome::Success),
            "fail" => Some(ForceOutcome::Fail),
            _ => None,
        }
    }

    /// Returns the value sent in [`FORCE_HEADER`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ForceOutcome::Success => "success",
            ForceOutcome::Fail => "fail",
        }
    }
}

/// What the coordinator asks the payment adapter to authorize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: i64,
    pub currency: String,
    pub items: Vec<LineItem>,
}

/// Authorization status returned by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Authorized,
    Declined,
}

/// The adapter's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDecision {
    pub status: PaymentStatus,
    pub auth_id: Option<String>,
    pub reason: Option<String>,
    pub event_time_ms: i64,
}

impl PaymentDecision {
    /// An authorization with a fresh `pay-` ID.
    pub fn authorized() -> Self {
        Self {
            status: PaymentStatus::Authorized,
            auth_id: Some(format!("pay-{}", uuid::Uuid::new_v4())),
            reason: None,
            event_time_ms: now_millis(),
        }
    }

    /// A decline with the given reason.
    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Declined,
            auth_id: None,
            reason: Some(reason.into()),
            event_time_ms: now_millis(),
        }
    }

    /// Returns true for an authorization.
    pub fn is_authorized(&self) -> bool {
        self.status == PaymentStatus::Authorized
    }
}

/// Decline reasons produced by the adapter and by the coordinator's
/// fail-closed handling.
pub mod reasons {
    pub const FORCED_FAIL: &str = "FORCED_FAIL";
    pub const INVALID_AMOUNT: &str = "INVALID_AMOUNT";
    pub const RANDOM_DECLINE: &str = "RANDOM_DECLINE";
    pub const PAYMENT_TIMEOUT: &str = "PAYMENT_TIMEOUT";
    pub const PAYMENT_UNAVAILABLE: &str = "PAYMENT_UNAVAILABLE";
    pub const MISSING_AUTH_ID: &str = "MISSING_AUTH_ID";
}

/// The stateless payment decision function.
///
/// Precedence: forced success, forced failure, non-positive amount, then a
/// random draw against the decline rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentDecider {
    decline_rate: u8,
}

impl PaymentDecider {
    /// Creates a decider declining `decline_rate` percent of payments.
    /// Values above 100 are clamped.
    pub fn new(decline_rate: u8) -> Self {
        Self {
            decline_rate: decline_rate.min(100),
        }
    }

    /// Returns the configured decline rate in percent.
    pub fn decline_rate(&self) -> u8 {
        self.decline_rate
    }

    /// Decides a payment.
    pub fn decide(&self, request: &PaymentRequest, force: Option<ForceOutcome>) -> PaymentDecision {
        let decision = match force {
            Some(ForceOutcome::Success) => PaymentDecision::authorized(),
            Some(ForceOutcome::Fail) => PaymentDecision::declined(reasons::FORCED_FAIL),
            None if request.amount <= 0 => PaymentDecision::declined(reasons::INVALID_AMOUNT),
            None => {
                let roll: u8 = rand::thread_rng().gen_range(0..100);
                if roll >= self.decline_rate {
                    PaymentDecision::authorized()
                } else {
                    PaymentDecision::declined(reasons::RANDOM_DECLINE)
                }
            }
        };

        match &decision.reason {
            Some(reason) => tracing::warn!(
                order_id = %request.order_id,
                %reason,
                "payment declined"
            ),
            None => tracing::info!(
                order_id = %request.order_id,
                amount = request.amount,
                currency = %request.currency,
                items = request.items.len(),
                "payment authorized"
            ),
        }
        decision
    }
}

/// Errors talking to a payment adapter.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The request could not be sent or the answer not read.
    #[error("Payment transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The adapter answered with a server error.
    #[error("Payment adapter returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// The one synchronous call in the saga.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Asks the adapter to authorize a payment.
    async fn authorize(
        &self,
        request: &PaymentRequest,
        force: Option<ForceOutcome>,
    ) -> Result<PaymentDecision, PaymentError>;
}

/// Runs the decider in-process.
#[derive(Debug, Clone, Default)]
pub struct LocalPaymentGateway {
    decider: PaymentDecider,
}

impl LocalPaymentGateway {
    /// Creates a gateway over `decider`.
    pub fn new(decider: PaymentDecider) -> Self {
        Self { decider }
    }
}

#[async_trait]
impl PaymentGateway for LocalPaymentGateway {
    async fn authorize(
        &self,
        request: &PaymentRequest,
        force: Option<ForceOutcome>,
    ) -> Result<PaymentDecision, PaymentError> {
        Ok(self.decider.decide(request, force))
    }
}

/// Calls a remote adapter at `POST {base_url}/payments/authorize`.
///
/// A 4xx answer is read as a decline carrying the response body as reason;
/// a 5xx answer is an error.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    url: String,
}

impl HttpPaymentGateway {
    /// Creates a gateway for the adapter at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a gateway reusing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/payments/authorize", base_url.trim_end_matches('/')),
        }
    }

    /// Returns the full authorize URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn authorize(
        &self,
        request: &PaymentRequest,
        force: Option<ForceOutcome>,
    ) -> Result<PaymentDecision, PaymentError> {
        let mut call = self.client.post(&self.url).json(request);
        if let Some(force) = force {
            call = call.header(FORCE_HEADER, force.as_str());
        }

        let response = call.send().await?;
        let status = response.status();

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let reason = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("DECLINED").to_string()
            } else {
                body
            };
            return Ok(PaymentDecision::declined(reason));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

//! HTTP client for a remote Callmeter API
//!
//! Lets a session run against collaborators hosted by `callmeter-api`: the
//! client implements [`TokenIssuer`] and [`WalletLedger`] and exposes the
//! invite endpoints as inherent methods.

use async_trait::async_trait;
use callmeter_core::{
    models::{CallInvite, InviteRequest, JoinCredential, SplitReceipt, WalletBalance},
    traits::{TokenIssuer, WalletLedger},
    AppError, AppResult,
};
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

const API_PREFIX: &str = "/api/v1";

/// Success envelope rendered by the API
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Error body rendered by the API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(default)]
    required: Option<i64>,
    #[serde(default)]
    available: Option<i64>,
}

#[derive(Serialize)]
struct CredentialBody<'a> {
    channel_name: &'a str,
    participant_id: &'a str,
}

#[derive(Serialize)]
struct AmountBody {
    amount: i64,
}

#[derive(Serialize)]
struct SplitBody<'a> {
    payer_id: &'a str,
    payee_id: &'a str,
    amount: i64,
}

#[derive(Serialize)]
struct NotifyBody<'a> {
    target_id: &'a str,
    #[serde(flatten)]
    request: &'a InviteRequest,
}

#[derive(Serialize)]
struct ResolveBody<'a> {
    channel_name: &'a str,
}

#[derive(Deserialize)]
struct ResolveReply {
    resolved: bool,
}

/// Client for the Callmeter HTTP API
pub struct ApiClient {
    http_client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Server root (e.g. `http://127.0.0.1:8000`)
    /// * `timeout_ms` - Per-request timeout in milliseconds
    pub fn new(base_url: &str, timeout_ms: u64) -> AppResult<Self> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from `CALLMETER_API_URL` and `CALLMETER_API_TIMEOUT_MS`
    pub fn from_env() -> AppResult<Self> {
        let base_url = std::env::var("CALLMETER_API_URL")
            .map_err(|_| AppError::Config("CALLMETER_API_URL not set".to_string()))?;

        let timeout_ms: u64 = std::env::var("CALLMETER_API_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .map_err(|_| AppError::Config("Invalid CALLMETER_API_TIMEOUT_MS".to_string()))?;

        Self::new(&base_url, timeout_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// Send an invite to `target_id`
    #[instrument(skip(self, request))]
    pub async fn notify(&self, target_id: &str, request: &InviteRequest) -> AppResult<CallInvite> {
        let body = NotifyBody { target_id, request };
        self.send_json(self.http_client.post(self.url("/invites")).json(&body))
            .await
    }

    /// Latest live invite for `user_id`
    pub async fn poll_inbox(&self, user_id: &str) -> AppResult<Option<CallInvite>> {
        self.send_optional(
            self.http_client
                .get(self.url(&format!("/invites/{}", user_id))),
        )
        .await
    }

    /// Withdraw the invite pending for `user_id`
    pub async fn cancel_invite(&self, user_id: &str) -> AppResult<Option<CallInvite>> {
        self.send_optional(
            self.http_client
                .delete(self.url(&format!("/invites/{}", user_id))),
        )
        .await
    }

    /// Clear `user_id`'s inbox entry for `channel_name`
    pub async fn resolve_invite(&self, user_id: &str, channel_name: &str) -> AppResult<bool> {
        let reply: ResolveReply = self
            .send_json(
                self.http_client
                    .post(self.url(&format!("/invites/{}/resolve", user_id)))
                    .json(&ResolveBody { channel_name }),
            )
            .await?;
        Ok(reply.resolved)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        match self.send_optional(request).await? {
            Some(value) => Ok(value),
            None => Err(AppError::Serialization("Empty response body".to_string())),
        }
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> AppResult<Option<T>> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        debug!(status = status.as_u16(), "API response");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.map_err(map_transport_error)?;
            return Err(error_from_response(status, &body));
        }

        let envelope = response.json::<Envelope<T>>().await.map_err(|e| {
            error!(error = %e, "Failed to decode API response");
            AppError::Serialization(e.to_string())
        })?;
        Ok(Some(envelope.data))
    }
}

#[async_trait]
impl TokenIssuer for ApiClient {
    async fn issue_join_credential(
        &self,
        channel_name: &str,
        participant_id: &str,
    ) -> AppResult<JoinCredential> {
        self.send_json(self.http_client.post(self.url("/credentials")).json(
            &CredentialBody {
                channel_name,
                participant_id,
            },
        ))
        .await
    }
}

#[async_trait]
impl WalletLedger for ApiClient {
    async fn balance(&self, account_id: &str) -> Result<WalletBalance, AppError> {
        self.send_json(
            self.http_client
                .get(self.url(&format!("/wallets/{}", account_id))),
        )
        .await
    }

    async fn credit(&self, account_id: &str, amount: i64) -> Result<i64, AppError> {
        let balance: WalletBalance = self
            .send_json(
                self.http_client
                    .post(self.url(&format!("/wallets/{}/topup", account_id)))
                    .json(&AmountBody { amount }),
            )
            .await?;
        Ok(balance.amount)
    }

    async fn debit(&self, account_id: &str, amount: i64) -> Result<i64, AppError> {
        let balance: WalletBalance = self
            .send_json(
                self.http_client
                    .post(self.url(&format!("/wallets/{}/debit", account_id)))
                    .json(&AmountBody { amount }),
            )
            .await?;
        Ok(balance.amount)
    }

    async fn split_pay(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: i64,
    ) -> Result<SplitReceipt, AppError> {
        self.send_json(self.http_client.post(self.url("/wallets/split")).json(
            &SplitBody {
                payer_id,
                payee_id,
                amount,
            },
        ))
        .await
    }
}

fn map_transport_error(err: reqwest::Error) -> AppError {
    if err.is_decode() {
        AppError::Serialization(err.to_string())
    } else {
        AppError::TransientNetwork(err.to_string())
    }
}

/// Rebuild the server-side error from an error response
fn error_from_response(status: StatusCode, body: &str) -> AppError {
    let Ok(body) = serde_json::from_str::<ErrorBody>(body) else {
        return match status {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                AppError::TransientNetwork(format!("HTTP {}", status.as_u16()))
            }
            _ => AppError::Internal(format!("HTTP {}", status.as_u16())),
        };
    };

    let message = body.message;
    match body.error.as_str() {
        "insufficient_funds" => AppError::InsufficientFunds {
            required: body.required.unwrap_or_default(),
            available: body.available.unwrap_or_default(),
        },
        "invite_expired" => AppError::InviteExpired(message),
        "join_failed" => AppError::JoinFailed(message),
        "credential_error" => AppError::Credential(message),
        "account_not_found" => AppError::AccountNotFound(message),
        "transient_network_error" | "cache_connection_error" => {
            AppError::TransientNetwork(message)
        }
        "token_expired" => AppError::TokenExpired,
        "invalid_token" => AppError::InvalidToken(message),
        "validation_error" | "invalid_transition" => AppError::Validation(message),
        "not_found" => AppError::NotFound(message),
        "consent_denied" => AppError::ConsentDenied,
        _ => AppError::Internal(message),
    }
}

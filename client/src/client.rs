use crate::{events::Stream, Error, Result, ValidatedConfig};
use cometa_types::{
    api::{BalanceResponse, CashoutRequest, PlaceBetRequest},
    CashoutResponse, PlaceBetResponse, Round, Update, UserId,
};
use commonware_codec::DecodeExt;
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient failures of read-only requests.
///
/// Bets and cashouts move money and carry no idempotency key, so they are
/// always sent exactly once regardless of this policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Cometa authority client, bound to one user.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub ws_url: Url,
    pub http_client: HttpClient,

    pub user: UserId,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str, user: UserId) -> Result<Self> {
        let base_url = Url::parse(base_url)?;

        // Convert http(s) to ws(s) for WebSocket URL
        let ws_scheme = match base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            scheme => {
                return Err(Error::InvalidScheme(scheme.to_string()));
            }
        };

        let mut ws_url = base_url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            ws_url,
            http_client,
            user,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Client for the authority and user of a validated config.
    #[allow(clippy::result_large_err)]
    pub fn from_config(config: &ValidatedConfig) -> Result<Self> {
        Ok(Self::new(config.url.as_str(), config.user)?.with_retry_policy(config.retry_policy))
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    async fn get_with_retry(&self, url: Url) -> Result<reqwest::Response> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            match self.http_client.get(url.clone()).send().await {
                Ok(response) => {
                    if !is_retryable_status(response.status()) || attempt >= max_attempts {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                }
            }
            debug!(%url, attempt, ?backoff, "retrying request");

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.base_url.join(path)?;
        debug!(%url, "posting action");
        let response = self.http_client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Fetch the current round, if the authority has opened one.
    pub async fn fetch_round(&self) -> Result<Option<Round>> {
        let url = self.base_url.join("round")?;
        let response = self.get_with_retry(url).await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let buf = response.bytes().await?.to_vec();
                Ok(Some(Round::decode(&mut buf.as_slice())?))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Failed(status)),
        }
    }

    /// Fetch the user's available balance.
    pub async fn fetch_balance(&self) -> Result<u64> {
        let url = self.base_url.join(&format!("balance/{}", self.user))?;
        let response = self.get_with_retry(url).await?;
        if !response.status().is_success() {
            return Err(Error::Failed(response.status()));
        }
        let body: BalanceResponse = response.json().await?;
        Ok(body.balance)
    }

    /// Ask the authority to accept a bet of `amount` for the current round.
    pub async fn place_bet(&self, amount: u64) -> Result<PlaceBetResponse> {
        let request = PlaceBetRequest {
            user: self.user,
            amount,
        };
        self.post_json("bet", &request).await
    }

    /// Ask the authority to cash out the user's bet at its current multiplier.
    pub async fn cashout(&self) -> Result<CashoutResponse> {
        let request = CashoutRequest { user: self.user };
        self.post_json("cashout", &request).await
    }

    /// Connect to the updates stream for this client's user.
    pub async fn connect_updates(&self) -> Result<Stream<Update>> {
        self.connect_updates_with_capacity(0).await
    }

    /// Connect to the updates stream with a configurable channel capacity.
    ///
    /// A `channel_capacity` of `0` uses the default capacity.
    pub async fn connect_updates_with_capacity(
        &self,
        channel_capacity: usize,
    ) -> Result<Stream<Update>> {
        let ws_url = self.ws_url.join(&format!("updates/{}", self.user))?;
        info!(%ws_url, user = self.user, "connecting to updates WebSocket");

        let (ws_stream, _) = timeout(TIMEOUT, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("WebSocket connected");

        Ok(Stream::new_with_capacity(ws_stream, channel_capacity))
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

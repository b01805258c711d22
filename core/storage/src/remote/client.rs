//! HTTP transport for the remote storage server.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use perceptra_common::{Credentials, Result, SensitiveString, StorageError};

const USER_AGENT: &str = "perceptra-storage/1.0";

/// Characters left unescaped in a key segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Authentication attached to every request.
enum Auth {
    None,
    ApiKey(SensitiveString),
    Bearer(SensitiveString),
    Basic {
        username: String,
        password: SensitiveString,
    },
}

impl Auth {
    /// `api_key` wins over `token`, which wins over basic credentials.
    fn from_credentials(credentials: &Credentials) -> Self {
        if let Some(key) = credentials.get("api_key") {
            Auth::ApiKey(SensitiveString::new(key))
        } else if let Some(token) = credentials.get("token") {
            Auth::Bearer(SensitiveString::new(token))
        } else if let (Some(username), Some(password)) =
            (credentials.get("username"), credentials.get("password"))
        {
            Auth::Basic {
                username: username.to_string(),
                password: SensitiveString::new(password),
            }
        } else {
            Auth::None
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => request,
            Auth::ApiKey(key) => request.header("X-API-Key", key.expose()),
            Auth::Bearer(token) => request.bearer_auth(token.expose()),
            Auth::Basic { username, password } => {
                request.basic_auth(username, Some(password.expose()))
            }
        }
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn map_status(status: StatusCode, context: &str, body: &str) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::not_found(format!("Resource not found: {}", context)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::permission_denied(format!("Permission denied: {}", context))
        }
        _ => StorageError::operation(format!(
            "{} failed with status {}: {}",
            context,
            status.as_u16(),
            body
        )),
    }
}

/// Classify a transport failure.
pub(crate) fn map_transport(err: reqwest::Error, context: &str) -> StorageError {
    let mapped = if err.is_connect() || err.is_timeout() {
        StorageError::connection(format!("Cannot reach remote server during {}", context))
    } else {
        StorageError::operation(format!("Remote {} failed", context))
    };
    mapped.with_source(err)
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// HTTP client for a remote storage server.
pub struct RemoteClient {
    http: Client,
    base_url: String,
    auth: Auth,
    retry: RetryConfig,
}

impl RemoteClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - `Connection` if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        timeout: Duration,
        verify_ssl: bool,
        retry: RetryConfig,
        credentials: &Credentials,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| {
                StorageError::connection("Remote storage initialization failed").with_source(e)
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Auth::from_credentials(credentials),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_retry(&mut self, retry: RetryConfig) {
        self.retry = retry;
    }

    /// Build a full URL for an endpoint path.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// URL of the file endpoint for `key`, with an optional suffix.
    pub fn file_url(&self, key: &str, suffix: Option<&str>) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();

        match suffix {
            Some(suffix) => self.url(&format!("files/{}/{}", encoded.join("/"), suffix)),
            None => self.url(&format!("files/{}", encoded.join("/"))),
        }
    }

    /// Send a request, retrying throttling, server errors and connect
    /// failures.
    ///
    /// The final response is returned as-is, whatever its status.
    pub async fn send<F>(&self, context: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            let outcome = self.auth.apply(build(&self.http)).send().await;

            match outcome {
                Ok(response)
                    if is_retryable(response.status()) && attempt < self.retry.max_retries =>
                {
                    warn!(
                        "Remote {} attempt {} returned {}, retrying",
                        context,
                        attempt + 1,
                        response.status()
                    );
                }
                Ok(response) => {
                    if attempt > 0 {
                        debug!("Remote {} succeeded after {} retries", context, attempt);
                    }
                    return Ok(response);
                }
                Err(err)
                    if (err.is_connect() || err.is_timeout())
                        && attempt < self.retry.max_retries =>
                {
                    warn!(
                        "Remote {} attempt {} failed: {}, retrying",
                        context,
                        attempt + 1,
                        err
                    );
                }
                Err(err) => return Err(map_transport(err, context)),
            }

            sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    /// Pass successful responses through and classify the rest.
    pub async fn check(response: Response, context: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, context, &body))
    }

    /// Send, classify and decode a JSON response.
    pub async fn json<T, F>(&self, context: &str, build: F) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = Self::check(self.send(context, build).await?, context).await?;
        response.json::<T>().await.map_err(|e| {
            StorageError::operation(format!("Invalid {} response from remote server", context))
                .with_source(e)
        })
    }
}

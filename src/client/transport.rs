use crate::config::{InitOptions, SessionConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Structured error body the server sends alongside a non-success status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP transport for one session: a reqwest client plus the identity
/// headers and the shared last-activity clock.
///
/// Every successful request updates last-activity, so foreground traffic and
/// the heartbeat task share a single liveness signal.
#[derive(Debug)]
pub struct StorageTransport {
    client: reqwest::Client,
    base_url: String,
    collector: String,
    app_key: String,
    last_activity: Mutex<Instant>,
}

impl StorageTransport {
    pub fn new(config: &SessionConfig, options: &InitOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if options.allow_unauthorized_https && config.server.starts_with("https") {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.server.trim_end_matches('/').to_string(),
            collector: config.collector.clone(),
            app_key: config.app_key.clone(),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Elapsed time since the last successful request on this transport.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .header("collector", &self.collector)
            .header("appkey", &self.app_key)
            .json(body)
            .send()
            .await?;

        self.decode(response).await
    }

    /// POST file bytes as a multipart form with a single `file` field, using
    /// the identifier as the file name.
    pub async fn post_multipart<T>(&self, path: &str, identifier: &str, bytes: Vec<u8>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(identifier.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(path))
            .header("collector", &self.collector)
            .header("appkey", &self.app_key)
            .multipart(form)
            .send()
            .await?;

        self.decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if let Err(err) = response.error_for_status_ref() {
            let status = response.status().as_u16();
            // A structured { message } body becomes a server error; anything
            // else surfaces as the underlying HTTP failure.
            return match response.json::<ErrorBody>().await {
                Ok(body) => Err(TransportError::Server {
                    status,
                    message: body.message,
                }),
                Err(_) => Err(TransportError::Http(err)),
            };
        }

        *self.last_activity.lock().unwrap() = Instant::now();
        Ok(response.json().await?)
    }
}

use serde::{Deserialize, Serialize};

/// Connection and batching settings for one upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the storage server, e.g. `https://storage.example.com`.
    pub server: String,

    /// Collector id sent in the `collector` header of every request.
    pub collector: String,

    /// Application key sent in the `appkey` header of every request.
    pub app_key: String,

    /// Batch name the version is registered under.
    pub name: String,

    /// Number of pending records that triggers an automatic flush.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_buffer() -> usize {
    100
}

/// Options applied when a session registers its version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitOptions {
    /// Accept invalid TLS certificates when the server URL is `https`.
    /// Applies to every subsequent request on the session.
    #[serde(default)]
    pub allow_unauthorized_https: bool,
}

//! Shared HTTP client construction.

use std::time::Duration;

use reqwest::Client;
use selector_engine::DEFAULT_UA;

/// Builds the client shared by the engine, the WBI signer and the cookie
/// provider. Falls back to library defaults if the builder rejects the
/// settings.
pub fn default_client() -> Client {
    match Client::builder()
        .user_agent(DEFAULT_UA)
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(error = %error, "failed to build tuned HTTP client, using defaults");
            Client::new()
        }
    }
}

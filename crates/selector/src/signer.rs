use async_trait::async_trait;

use crate::error::SelectionError;

/// Signing seam between the engine and the upstream's request-signing scheme.
/// The engine builds the plain parameters; the signer returns the final query
/// string with whatever signature fields the upstream requires appended.
#[async_trait]
pub trait ParamSigner: Send + Sync {
    /// `cookie` is the credential the signed request will be sent with,
    /// available in case key refresh depends on it.
    async fn signed_query(
        &self,
        params: Vec<(&str, String)>,
        cookie: &str,
    ) -> Result<String, SelectionError>;
}

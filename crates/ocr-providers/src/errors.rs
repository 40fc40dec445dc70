use crate::capability::Capability;
use thiserror::Error;

/// Errores de resolución e invocación de proveedores.
///
/// El ejecutor los registra como `error` del paso; nunca abortan la cadena.
#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("provider '{0}' not found")]
  NotFound(String),
  #[error("provider '{0}' is unavailable")]
  Unavailable(String),
  #[error("provider '{provider}' does not support {capability}")]
  Unsupported { provider: String, capability: Capability },
  #[error("provider '{provider}' timed out after {timeout_ms} ms")]
  Timeout { provider: String, timeout_ms: u64 },
  #[error("document not found or unreadable: {0}")]
  DocumentNotFound(String),
  #[error("provider failure: {0}")]
  Failed(String),
  #[error("malformed provider response: {0}")]
  MalformedResponse(String),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProviderError {
  fn from(e: serde_json::Error) -> Self {
    Self::MalformedResponse(e.to_string())
  }
}

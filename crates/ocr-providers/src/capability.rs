// capability.rs
// Interfaces cerradas de proveedores: reconocer texto en una imagen o
// transformar texto dado un prompt.
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
  Recognition,
  Transform,
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Capability::Recognition => write!(f, "recognition"),
      Capability::Transform => write!(f, "transform"),
    }
  }
}

/// Entrada de una invocación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderInput {
  Image { path: PathBuf },
  Text { text: String, prompt: Option<String> },
}

impl ProviderInput {
  pub fn capability(&self) -> Capability {
    match self {
      ProviderInput::Image { .. } => Capability::Recognition,
      ProviderInput::Text { .. } => Capability::Transform,
    }
  }
}

/// Texto producido y confianza reportada por el proveedor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
  pub text: String,
  pub confidence: Option<f32>,
}

impl ProviderOutput {
  pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
    Self { text: text.into(), confidence }
  }
}

/// Reconoce texto en una imagen/documento.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
  fn name(&self) -> &str;

  fn is_available(&self) -> bool {
    true
  }

  async fn recognize(&self, image: &Path) -> Result<ProviderOutput, ProviderError>;
}

/// Transforma texto; `prompt` sólo tiene sentido para estos proveedores.
#[async_trait]
pub trait TextTransformer: Send + Sync {
  fn name(&self) -> &str;

  fn is_available(&self) -> bool {
    true
  }

  async fn transform(&self, text: &str, prompt: Option<&str>) -> Result<ProviderOutput, ProviderError>;
}

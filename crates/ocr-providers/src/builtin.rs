// builtin.rs
// Proveedores locales incluidos con el crate. No hacen llamadas de red:
// sirven para pipelines de demostración y para cablear el binario.
use crate::capability::{ProviderOutput, TextRecognizer, TextTransformer};
use crate::errors::ProviderError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Reconocedor que lee el texto de un archivo "sidecar" junto a la imagen:
/// `scan.png` => `scan.txt`. Si el documento ya es `.txt` se lee tal cual.
pub struct SidecarTextRecognizer {
  name: String,
}

impl SidecarTextRecognizer {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn sidecar_path(image: &Path) -> PathBuf {
    if image.extension().is_some_and(|e| e.eq_ignore_ascii_case("txt")) {
      image.to_path_buf()
    } else {
      image.with_extension("txt")
    }
  }
}

#[async_trait]
impl TextRecognizer for SidecarTextRecognizer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recognize(&self, image: &Path) -> Result<ProviderOutput, ProviderError> {
    let sidecar = Self::sidecar_path(image);
    match tokio::fs::read_to_string(&sidecar).await {
      Ok(text) => Ok(ProviderOutput::new(text.trim_end().to_string(), Some(1.0))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(ProviderError::Failed(format!("no sidecar text at {}", sidecar.display())))
      }
      Err(e) => Err(ProviderError::Io(e)),
    }
  }
}

/// Pasa el texto a mayúsculas.
pub struct UppercaseTransformer {
  name: String,
}

impl UppercaseTransformer {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

#[async_trait]
impl TextTransformer for UppercaseTransformer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn transform(&self, text: &str, _prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    Ok(ProviderOutput::new(text.to_uppercase(), None))
  }
}

/// Reconciliación simple de varias salidas: conserva la primera aparición
/// de cada línea no vacía y descarta las líneas separadoras (`---`).
pub struct MergeLinesTransformer {
  name: String,
}

impl MergeLinesTransformer {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn merge(text: &str) -> String {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "---")
        .filter(|l| seen.insert(l.to_string()))
        .collect::<Vec<_>>()
        .join("\n")
  }
}

#[async_trait]
impl TextTransformer for MergeLinesTransformer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn transform(&self, text: &str, _prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    Ok(ProviderOutput::new(Self::merge(text), None))
  }
}

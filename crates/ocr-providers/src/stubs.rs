// stubs.rs
// Proveedores deterministas para pruebas y demos: texto fijo, fallos,
// latencia artificial, indisponibilidad y pánicos controlados.
use crate::capability::{ProviderOutput, TextRecognizer, TextTransformer};
use crate::errors::ProviderError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Devuelve siempre el mismo texto.
pub struct StaticRecognizer {
  name: String,
  text: String,
  confidence: f32,
}

impl StaticRecognizer {
  pub fn new(name: impl Into<String>, text: impl Into<String>, confidence: f32) -> Self {
    Self { name: name.into(), text: text.into(), confidence }
  }
}

#[async_trait]
impl TextRecognizer for StaticRecognizer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recognize(&self, _image: &Path) -> Result<ProviderOutput, ProviderError> {
    Ok(ProviderOutput::new(self.text.clone(), Some(self.confidence)))
  }
}

/// Devuelve la entrada, precedida por `[prompt] ` si hay prompt. Registra
/// cada entrada recibida para que las pruebas puedan inspeccionarla.
pub struct EchoTransformer {
  name: String,
  seen: Mutex<Vec<(String, Option<String>)>>,
}

impl EchoTransformer {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), seen: Mutex::new(Vec::new()) }
  }

  /// Entradas recibidas, en orden de llamada.
  pub fn inputs(&self) -> Vec<(String, Option<String>)> {
    self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

#[async_trait]
impl TextTransformer for EchoTransformer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn transform(&self, text: &str, prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    self.seen
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((text.to_string(), prompt.map(str::to_string)));
    let out = match prompt {
      Some(p) => format!("[{}] {}", p, text),
      None => text.to_string(),
    };
    Ok(ProviderOutput::new(out, Some(0.5)))
  }
}

/// Falla siempre con el mismo mensaje, en ambas capacidades.
pub struct FailingProvider {
  name: String,
  message: String,
}

impl FailingProvider {
  pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self { name: name.into(), message: message.into() }
  }
}

#[async_trait]
impl TextRecognizer for FailingProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recognize(&self, _image: &Path) -> Result<ProviderOutput, ProviderError> {
    Err(ProviderError::Failed(self.message.clone()))
  }
}

#[async_trait]
impl TextTransformer for FailingProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn transform(&self, _text: &str, _prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    Err(ProviderError::Failed(self.message.clone()))
  }
}

/// Responde tras `delay`. Útil para probar timeouts.
pub struct SlowProvider {
  name: String,
  delay: Duration,
  text: String,
}

impl SlowProvider {
  pub fn new(name: impl Into<String>, delay: Duration, text: impl Into<String>) -> Self {
    Self { name: name.into(), delay, text: text.into() }
  }
}

#[async_trait]
impl TextRecognizer for SlowProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recognize(&self, _image: &Path) -> Result<ProviderOutput, ProviderError> {
    tokio::time::sleep(self.delay).await;
    Ok(ProviderOutput::new(self.text.clone(), None))
  }
}

#[async_trait]
impl TextTransformer for SlowProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn transform(&self, _text: &str, _prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    tokio::time::sleep(self.delay).await;
    Ok(ProviderOutput::new(self.text.clone(), None))
  }
}

/// Registrado pero siempre no disponible.
pub struct UnavailableProvider {
  name: String,
}

impl UnavailableProvider {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

#[async_trait]
impl TextRecognizer for UnavailableProvider {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_available(&self) -> bool {
    false
  }

  async fn recognize(&self, _image: &Path) -> Result<ProviderOutput, ProviderError> {
    Err(ProviderError::Unavailable(self.name.clone()))
  }
}

#[async_trait]
impl TextTransformer for UnavailableProvider {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_available(&self) -> bool {
    false
  }

  async fn transform(&self, _text: &str, _prompt: Option<&str>) -> Result<ProviderOutput, ProviderError> {
    Err(ProviderError::Unavailable(self.name.clone()))
  }
}

/// Entra en pánico en las primeras `panics` llamadas y luego devuelve
/// `text`. Simula la caída de un worker a mitad de documento.
pub struct FlakyRecognizer {
  name: String,
  text: String,
  panics_left: AtomicUsize,
  calls: AtomicUsize,
}

impl FlakyRecognizer {
  pub fn new(name: impl Into<String>, text: impl Into<String>, panics: usize) -> Self {
    Self { name: name.into(),
           text: text.into(),
           panics_left: AtomicUsize::new(panics),
           calls: AtomicUsize::new(0) }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl TextRecognizer for FlakyRecognizer {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recognize(&self, _image: &Path) -> Result<ProviderOutput, ProviderError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let should_panic = self.panics_left
                           .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                           .is_ok();
    if should_panic {
      panic!("simulated worker crash in '{}'", self.name);
    }
    Ok(ProviderOutput::new(self.text.clone(), Some(1.0)))
  }
}

// registry.rs
// Tabla de proveedores indexada por nombre. Se construye al arrancar y es
// de sólo lectura durante la ejecución.
use crate::capability::{Capability, ProviderInput, ProviderOutput, TextRecognizer, TextTransformer};
use crate::errors::ProviderError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Proveedor resuelto para una capacidad concreta.
#[derive(Clone)]
pub enum ResolvedProvider {
  Recognizer(Arc<dyn TextRecognizer>),
  Transformer(Arc<dyn TextTransformer>),
}

impl ResolvedProvider {
  pub fn name(&self) -> &str {
    match self {
      ResolvedProvider::Recognizer(r) => r.name(),
      ResolvedProvider::Transformer(t) => t.name(),
    }
  }

  /// Invoca el proveedor. La entrada debe corresponder a la capacidad con la
  /// que se resolvió.
  pub async fn invoke(&self, input: &ProviderInput) -> Result<ProviderOutput, ProviderError> {
    match (self, input) {
      (ResolvedProvider::Recognizer(r), ProviderInput::Image { path }) => r.recognize(path).await,
      (ResolvedProvider::Transformer(t), ProviderInput::Text { text, prompt }) => {
        t.transform(text, prompt.as_deref()).await
      }
      (_, input) => Err(ProviderError::Unsupported { provider: self.name().to_string(),
                                                     capability: input.capability() }),
    }
  }
}

/// Descripción de un proveedor registrado (para listados).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
  pub name: String,
  pub capabilities: Vec<Capability>,
  pub available: bool,
}

/// Registro de capacidades indexado por nombre de proveedor.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
  recognizers: HashMap<String, Arc<dyn TextRecognizer>>,
  transformers: HashMap<String, Arc<dyn TextTransformer>>,
}

impl CapabilityRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registra un reconocedor bajo `name()`. Reemplaza uno previo con el
  /// mismo nombre.
  pub fn register_recognizer(&mut self, recognizer: Arc<dyn TextRecognizer>) {
    let name = recognizer.name().to_string();
    if self.recognizers.insert(name.clone(), recognizer).is_some() {
      log::warn!("recognizer '{}' registered twice; keeping the last one", name);
    }
  }

  pub fn register_transformer(&mut self, transformer: Arc<dyn TextTransformer>) {
    let name = transformer.name().to_string();
    if self.transformers.insert(name.clone(), transformer).is_some() {
      log::warn!("transformer '{}' registered twice; keeping the last one", name);
    }
  }

  pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
    self.register_recognizer(recognizer);
    self
  }

  pub fn with_transformer(mut self, transformer: Arc<dyn TextTransformer>) -> Self {
    self.register_transformer(transformer);
    self
  }

  pub fn contains(&self, name: &str) -> bool {
    self.recognizers.contains_key(name) || self.transformers.contains_key(name)
  }

  /// `true` si el proveedor existe y al menos una de sus capacidades está
  /// disponible.
  pub fn is_available(&self, name: &str) -> bool {
    self.recognizers.get(name).is_some_and(|r| r.is_available())
    || self.transformers.get(name).is_some_and(|t| t.is_available())
  }

  pub fn capabilities(&self, name: &str) -> Vec<Capability> {
    let mut caps = Vec::new();
    if self.recognizers.contains_key(name) {
      caps.push(Capability::Recognition);
    }
    if self.transformers.contains_key(name) {
      caps.push(Capability::Transform);
    }
    caps
  }

  /// Nombres de proveedores en orden alfabético.
  pub fn provider_names(&self) -> Vec<String> {
    let names: BTreeSet<&String> = self.recognizers.keys().chain(self.transformers.keys()).collect();
    names.into_iter().cloned().collect()
  }

  pub fn describe(&self) -> Vec<ProviderInfo> {
    self.provider_names()
        .into_iter()
        .map(|name| ProviderInfo { capabilities: self.capabilities(&name),
                                   available: self.is_available(&name),
                                   name })
        .collect()
  }

  /// Resuelve `name` para la capacidad pedida.
  ///
  /// - no registrado => `NotFound`
  /// - registrado sin esa capacidad => `Unsupported`
  /// - registrado pero no disponible => `Unavailable`
  pub fn resolve(&self, name: &str, capability: Capability) -> Result<ResolvedProvider, ProviderError> {
    if !self.contains(name) {
      return Err(ProviderError::NotFound(name.to_string()));
    }
    let resolved = match capability {
      Capability::Recognition => self.recognizers.get(name).map(|r| {
                                                             (r.is_available(), ResolvedProvider::Recognizer(r.clone()))
                                                           }),
      Capability::Transform => self.transformers.get(name).map(|t| {
                                                            (t.is_available(), ResolvedProvider::Transformer(t.clone()))
                                                          }),
    };
    match resolved {
      None => Err(ProviderError::Unsupported { provider: name.to_string(), capability }),
      Some((false, _)) => Err(ProviderError::Unavailable(name.to_string())),
      Some((true, provider)) => Ok(provider),
    }
  }

  /// `invoke(provider_name, {image_path} | {text, prompt})`.
  pub async fn invoke(&self, name: &str, input: &ProviderInput) -> Result<ProviderOutput, ProviderError> {
    let provider = self.resolve(name, input.capability())?;
    provider.invoke(input).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stubs::{FailingProvider, StaticRecognizer, UnavailableProvider};

  fn registry() -> CapabilityRegistry {
    CapabilityRegistry::new().with_recognizer(Arc::new(StaticRecognizer::new("ocr-a", "hello", 0.9)))
                             .with_transformer(Arc::new(UnavailableProvider::new("llm-off")))
                             .with_transformer(Arc::new(FailingProvider::new("broken", "boom")))
  }

  #[test]
  fn resolve_distinguishes_missing_unsupported_and_unavailable() {
    let r = registry();
    assert!(matches!(r.resolve("nope", Capability::Recognition), Err(ProviderError::NotFound(_))));
    assert!(matches!(r.resolve("ocr-a", Capability::Transform), Err(ProviderError::Unsupported { .. })));
    assert!(matches!(r.resolve("llm-off", Capability::Transform), Err(ProviderError::Unavailable(_))));
    assert!(r.resolve("ocr-a", Capability::Recognition).is_ok());
  }

  #[test]
  fn names_are_sorted_and_described() {
    let r = registry();
    assert_eq!(r.provider_names(), vec!["broken", "llm-off", "ocr-a"]);
    let info = r.describe();
    assert_eq!(info[1].name, "llm-off");
    assert!(!info[1].available);
    assert_eq!(info[2].capabilities, vec![Capability::Recognition]);
  }

  #[tokio::test]
  async fn invoke_routes_by_input_kind() {
    let r = registry();
    let out = r.invoke("ocr-a", &ProviderInput::Image { path: "/tmp/x.png".into() }).await.unwrap();
    assert_eq!(out.text, "hello");
    let err = r.invoke("broken", &ProviderInput::Text { text: "t".into(), prompt: None }).await.unwrap_err();
    assert_eq!(err.to_string(), "provider failure: boom");
  }
}

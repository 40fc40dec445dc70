// Archivo: executor.rs
// Propósito: ejecutar la cadena de pasos de una plantilla congelada sobre un
// único documento. Los pasos corren en orden; un paso fallido queda
// registrado y los siguientes continúan.
use chain::{ChainStep, DocumentRef, DocumentResult, InputSource, StepKind, StepMetadata, StepOutcome, StepOutput,
            StepResult, TemplateSnapshot, COMBINED_SEPARATOR};
use chrono::Utc;
use ocr_providers::{Capability, CapabilityRegistry, ProviderError, ProviderInput, ProviderOutput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entrada resuelta de un paso antes de la comprobación previa.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedInput {
  Image(PathBuf),
  Text(String),
}

impl ResolvedInput {
  pub fn kind(&self) -> StepKind {
    match self {
      ResolvedInput::Image(_) => StepKind::Recognition,
      ResolvedInput::Text(_) => StepKind::Transform,
    }
  }
}

/// Resuelve la fuente de entrada de un paso contra los resultados ya
/// registrados para el documento (`prior`, en orden de número de paso).
///
/// Un paso previo fallido aporta texto vacío. `combined` y `step_reference`
/// unen las salidas no vacías con `COMBINED_SEPARATOR`.
pub fn resolve_input(source: &InputSource, document: &DocumentRef, prior: &[StepResult]) -> ResolvedInput {
  match source {
    InputSource::OriginalDocument => ResolvedInput::Image(document.path.clone()),
    InputSource::PreviousStep => {
      ResolvedInput::Text(prior.last().and_then(|r| r.output_text()).unwrap_or_default().to_string())
    }
    InputSource::Combined => ResolvedInput::Text(join_outputs(prior.iter())),
    InputSource::StepReference { steps } => {
      ResolvedInput::Text(join_outputs(prior.iter().filter(|r| steps.contains(&r.step_number))))
    }
  }
}

fn join_outputs<'a>(records: impl Iterator<Item = &'a StepResult>) -> String {
  records.filter_map(|r| r.output_text())
         .filter(|t| !t.is_empty())
         .collect::<Vec<_>>()
         .join(COMBINED_SEPARATOR)
}

/// Comprueba que la imagen existe y es legible. Devuelve su tamaño en bytes.
async fn preflight(path: &Path) -> Result<u64, ProviderError> {
  let not_found = || ProviderError::DocumentNotFound(path.display().to_string());
  let meta = tokio::fs::metadata(path).await.map_err(|_| not_found())?;
  if !meta.is_file() {
    return Err(not_found());
  }
  tokio::fs::File::open(path).await.map_err(|_| not_found())?;
  Ok(meta.len())
}

fn elapsed_ms(started: Instant) -> u64 {
  started.elapsed().as_millis() as u64
}

/// Ejecutor de cadenas para un documento.
#[derive(Clone)]
pub struct ChainExecutor {
  registry: Arc<CapabilityRegistry>,
  step_timeout: Duration,
}

impl ChainExecutor {
  pub fn new(registry: Arc<CapabilityRegistry>, step_timeout: Duration) -> Self {
    Self { registry, step_timeout }
  }

  pub fn registry(&self) -> &CapabilityRegistry {
    &self.registry
  }

  pub fn step_timeout(&self) -> Duration {
    self.step_timeout
  }

  /// Ejecuta los pasos habilitados de `snapshot` sobre `document`.
  ///
  /// Nunca devuelve error: los fallos quedan en cada `StepResult` y el estado
  /// del documento se deriva de ellos. Un pánico de un proveedor sí se
  /// propaga (lo gestiona el coordinador como entrega fallida).
  pub async fn execute(&self, snapshot: &TemplateSnapshot, document: &DocumentRef) -> DocumentResult {
    let started = Instant::now();
    let mut records: Vec<StepResult> = Vec::with_capacity(snapshot.step_count());
    for step in snapshot.enabled_steps() {
      let record = self.run_step(step, document, &records).await;
      match record.error() {
        Some(e) => log::warn!("'{}' paso {} ({}) fallido: {}", document.name, step.step_number, step.provider, e),
        None => log::debug!("'{}' paso {} ({}) ok en {} ms",
                            document.name,
                            step.step_number,
                            step.provider,
                            record.metadata.processing_time_ms),
      }
      records.push(record);
    }
    let result = DocumentResult::from_steps(document.name.clone(), records, elapsed_ms(started));
    log::info!("'{}' procesado: {} ({} pasos, {} ms)",
               result.document_ref,
               result.status,
               result.steps.len(),
               result.total_time_ms);
    result
  }

  async fn run_step(&self, step: &ChainStep, document: &DocumentRef, prior: &[StepResult]) -> StepResult {
    let timestamp = Utc::now();
    let started = Instant::now();
    let resolved = resolve_input(&step.input_source, document, prior);
    let kind = resolved.kind();

    let (input_length, outcome) = match resolved {
      ResolvedInput::Image(path) => match preflight(&path).await {
        Ok(size) => (size as usize, self.invoke(step, Capability::Recognition, ProviderInput::Image { path }).await),
        Err(e) => (0, Err(e)),
      },
      ResolvedInput::Text(text) => {
        let len = text.chars().count();
        let input = ProviderInput::Text { text, prompt: step.prompt.clone() };
        (len, self.invoke(step, Capability::Transform, input).await)
      }
    };

    let outcome = match outcome {
      Ok(out) => StepOutcome::Output(StepOutput { text: out.text, confidence: out.confidence }),
      Err(e) => StepOutcome::Error(e.to_string()),
    };
    let output_length = match &outcome {
      StepOutcome::Output(o) => o.text.chars().count(),
      StepOutcome::Error(_) => 0,
    };
    StepResult { step_number: step.step_number,
                 provider: step.provider.clone(),
                 input_source: step.input_source.clone(),
                 prompt: step.prompt.clone(),
                 kind,
                 outcome,
                 metadata: StepMetadata { processing_time_ms: elapsed_ms(started),
                                          timestamp,
                                          input_length,
                                          output_length } }
  }

  async fn invoke(&self,
                  step: &ChainStep,
                  capability: Capability,
                  input: ProviderInput)
                  -> Result<ProviderOutput, ProviderError> {
    let provider = self.registry.resolve(&step.provider, capability)?;
    match tokio::time::timeout(self.step_timeout, provider.invoke(&input)).await {
      Ok(res) => res,
      Err(_) => Err(ProviderError::Timeout { provider: step.provider.clone(),
                                             timeout_ms: self.step_timeout.as_millis() as u64 }),
    }
  }
}

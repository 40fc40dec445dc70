// Archivo: domain/template.rs
// Propósito: tipos de plantilla de cadena (`ChainTemplate`, `ChainStep`,
// `InputSource`) y la copia congelada que usa un job (`TemplateSnapshot`).
use crate::errors::ValidationError;
use crate::validation::validate_steps;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Separador fijo entre salidas concatenadas (`combined` y
/// `step_reference`). Versionado: cambiarlo altera `input_length` y los
/// exports, por lo que cualquier cambio debe subir `COMBINED_SEPARATOR_VERSION`.
pub const COMBINED_SEPARATOR: &str = "\n\n---\n\n";
pub const COMBINED_SEPARATOR_VERSION: u32 = 1;

/// Visibilidad de la plantilla para otros usuarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Shared,
}

/// Origen de la entrada de un paso.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// El documento fuente, sin cambios.
    OriginalDocument,
    /// Salida del paso habilitado más cercano anterior.
    PreviousStep,
    /// Salidas de todos los pasos anteriores, en orden de paso.
    Combined,
    /// Salidas de exactamente los pasos indicados, en orden ascendente.
    StepReference { steps: BTreeSet<u32> },
}

impl InputSource {
    pub fn step_reference<I>(steps: I) -> Self
        where I: IntoIterator<Item = u32>
    {
        InputSource::StepReference { steps: steps.into_iter().collect() }
    }

    pub fn is_original_document(&self) -> bool {
        matches!(self, InputSource::OriginalDocument)
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::OriginalDocument => write!(f, "original_document"),
            InputSource::PreviousStep => write!(f, "previous_step"),
            InputSource::Combined => write!(f, "combined"),
            InputSource::StepReference { steps } => {
                let list: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
                write!(f, "step_reference({})", list.join(","))
            }
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Un paso de la plantilla: proveedor + regla de enrutamiento de entrada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub step_number: u32,
    pub provider: String,
    pub input_source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ChainStep {
    pub fn new(step_number: u32, provider: impl Into<String>, input_source: InputSource) -> Self {
        Self { step_number,
               provider: provider.into(),
               input_source,
               prompt: None,
               enabled: true }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Plantilla guardada y validada.
///
/// Los pasos se normalizan por `step_number` al construirse; el orden de la
/// lista de entrada no tiene significado propio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: String,
    #[serde(default)]
    pub visibility: Visibility,
    /// Empieza en 1 y sube con cada edición aceptada.
    pub version: u32,
    pub steps: Vec<ChainStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainTemplate {
    /// Construye una plantilla nueva. Falla con el `ValidationError`
    /// concreto si los pasos no son estructuralmente válidos.
    pub fn new(name: impl Into<String>,
               owner: impl Into<String>,
               steps: Vec<ChainStep>)
               -> std::result::Result<Self, ValidationError> {
        validate_steps(&steps)?;
        let now = Utc::now();
        Ok(Self { id: Uuid::new_v4(),
                  name: name.into(),
                  description: None,
                  owner: owner.into(),
                  visibility: Visibility::Private,
                  version: 1,
                  steps: normalize_steps(steps),
                  created_at: now,
                  updated_at: now })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Congela los pasos actuales. Ediciones posteriores de la plantilla no
    /// afectan al snapshot devuelto.
    pub fn snapshot(&self) -> TemplateSnapshot {
        TemplateSnapshot::from_template(self)
    }
}

/// Ordena los pasos por `step_number`.
pub fn normalize_steps(mut steps: Vec<ChainStep>) -> Vec<ChainStep> {
    steps.sort_by_key(|s| s.step_number);
    steps
}

/// Copia inmutable de los pasos de una plantilla en el momento del lanzamiento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub template_id: Uuid,
    pub template_name: String,
    pub template_version: u32,
    pub steps: Vec<ChainStep>,
    /// SHA-256 de la forma canónica de los pasos.
    pub fingerprint: String,
    pub combined_separator_version: u32,
    pub frozen_at: DateTime<Utc>,
}

impl TemplateSnapshot {
    pub fn from_template(template: &ChainTemplate) -> Self {
        let steps = normalize_steps(template.steps.clone());
        let fingerprint = fingerprint_steps(&steps);
        Self { template_id: template.id,
               template_name: template.name.clone(),
               template_version: template.version,
               steps,
               fingerprint,
               combined_separator_version: COMBINED_SEPARATOR_VERSION,
               frozen_at: Utc::now() }
    }

    /// Pasos habilitados en orden ascendente de `step_number`.
    pub fn enabled_steps(&self) -> impl Iterator<Item = &ChainStep> {
        let mut steps: Vec<&ChainStep> = self.steps.iter().filter(|s| s.enabled).collect();
        steps.sort_by_key(|s| s.step_number);
        steps.into_iter()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Huella determinista de una lista de pasos.
pub fn fingerprint_steps(steps: &[ChainStep]) -> String {
    let mut ordered: Vec<&ChainStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_number);
    let mut hasher = Sha256::new();
    for s in ordered {
        hasher.update(format!("{}|{}|{}|{}|{}\n",
                              s.step_number,
                              s.provider,
                              s.input_source,
                              s.prompt.as_deref().unwrap_or(""),
                              s.enabled).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

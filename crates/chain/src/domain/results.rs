// Archivo: domain/results.rs
// Propósito: registros de auditoría de la ejecución (`StepResult`,
// `DocumentResult`). Una vez escritos no se modifican.
use crate::domain::template::InputSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tipo de paso según la entrada resuelta: imagen => reconocimiento,
/// texto => transformación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Recognition,
    Transform,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Recognition => write!(f, "recognition"),
            StepKind::Transform => write!(f, "transform"),
        }
    }
}

/// Texto producido por un proveedor y su confianza reportada (si la hay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Salida o error, nunca ambos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Output(StepOutput),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub processing_time_ms: u64,
    /// Instante de inicio del paso.
    pub timestamp: DateTime<Utc>,
    pub input_length: usize,
    pub output_length: usize,
}

/// Resultado inmutable de un paso para un documento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: u32,
    pub provider: String,
    pub input_source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub kind: StepKind,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub metadata: StepMetadata,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Output(_))
    }

    pub fn output(&self) -> Option<&StepOutput> {
        match &self.outcome {
            StepOutcome::Output(o) => Some(o),
            StepOutcome::Error(_) => None,
        }
    }

    pub fn output_text(&self) -> Option<&str> {
        self.output().map(|o| o.text.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Error(e) => Some(e.as_str()),
            StepOutcome::Output(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Success,
    Partial,
    Failed,
}

impl DocumentStatus {
    /// Cuenta para el contador `failed` del job.
    pub fn counts_as_failure(self) -> bool {
        !matches!(self, DocumentStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Success => "success",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(DocumentStatus::Success),
            "partial" => Some(DocumentStatus::Partial),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resultado completo de un documento en un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_ref: String,
    pub status: DocumentStatus,
    pub final_output: String,
    /// Un registro por paso habilitado intentado, ordenado por `step_number`.
    pub steps: Vec<StepResult>,
    pub total_time_ms: u64,
}

impl DocumentResult {
    /// Ensambla el resultado a partir de los pasos ya registrados y deriva
    /// `final_output` y `status`.
    pub fn from_steps(document_ref: impl Into<String>, mut steps: Vec<StepResult>, total_time_ms: u64) -> Self {
        steps.sort_by_key(|s| s.step_number);
        let final_output = steps.iter()
                                .rev()
                                .find_map(|s| s.output_text())
                                .unwrap_or_default()
                                .to_string();
        let succeeded = steps.iter().filter(|s| s.is_success()).count();
        let status = if !steps.is_empty() && succeeded == steps.len() {
            DocumentStatus::Success
        } else if succeeded > 0 && !final_output.is_empty() {
            DocumentStatus::Partial
        } else {
            DocumentStatus::Failed
        };
        Self { document_ref: document_ref.into(),
               status,
               final_output,
               steps,
               total_time_ms }
    }

    pub fn step(&self, step_number: u32) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn attempted_steps(&self) -> usize {
        self.steps.len()
    }
}

// Archivo: domain/job.rs
// Propósito: el job de cadena (`ChainJob`), su estado y los tipos que usan
// los stores para contabilizar progreso de forma idempotente.
use crate::domain::results::DocumentStatus;
use crate::domain::template::TemplateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Documento de entrada. `name` es parte de la clave del resultado y es
/// único dentro de un job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub path: PathBuf,
}

impl DocumentRef {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    /// Usa el nombre de archivo como `name`. `None` si la ruta no tiene
    /// nombre de archivo (p.ej. `..`).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_string_lossy().to_string();
        Some(Self { name, path: path.to_path_buf() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    CompletedWithErrors,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self,
                 JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Error | JobStatus::Cancelled)
    }

    /// Sólo los jobs completados (con o sin errores) se pueden exportar.
    pub fn is_exportable(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "completed_with_errors" => Some(JobStatus::CompletedWithErrors),
            "error" => Some(JobStatus::Error),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Una ejecución de una plantilla sobre un conjunto de documentos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainJob {
    pub id: Uuid,
    pub template_snapshot: TemplateSnapshot,
    pub document_set: Vec<DocumentRef>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
}

impl ChainJob {
    pub fn new(template_snapshot: TemplateSnapshot, document_set: Vec<DocumentRef>) -> Self {
        let total = document_set.len() as u64;
        Self { id: Uuid::new_v4(),
               template_snapshot,
               document_set,
               status: JobStatus::Queued,
               created_at: Utc::now(),
               completed_at: None,
               total,
               processed: 0,
               failed: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 / self.total as f64) * 100.0
    }

    /// Estado terminal que corresponde a los contadores, si todos los
    /// documentos ya fueron procesados.
    pub fn settled_status(&self) -> Option<JobStatus> {
        if self.processed < self.total {
            return None;
        }
        if self.failed == 0 {
            Some(JobStatus::Completed)
        } else {
            Some(JobStatus::CompletedWithErrors)
        }
    }

    pub fn document(&self, name: &str) -> Option<&DocumentRef> {
        self.document_set.iter().find(|d| d.name == name)
    }
}

/// Resultado de un upsert de `DocumentResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced { previous: DocumentStatus },
}

/// Ajuste atómico de contadores del job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressDelta {
    pub processed: i64,
    pub failed: i64,
}

impl ProgressDelta {
    /// Delta tras persistir un resultado con estado `status`. Un reemplazo
    /// (re-entrega) no vuelve a contar `processed`; sólo corrige `failed`.
    pub fn for_put(outcome: PutOutcome, status: DocumentStatus) -> Self {
        let now_failed = status.counts_as_failure() as i64;
        match outcome {
            PutOutcome::Inserted => ProgressDelta { processed: 1, failed: now_failed },
            PutOutcome::Replaced { previous } => {
                ProgressDelta { processed: 0,
                                failed: now_failed - previous.counts_as_failure() as i64 }
            }
        }
    }

    pub fn is_noop(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

/// Aplica un delta a un contador sin bajar de cero.
pub fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

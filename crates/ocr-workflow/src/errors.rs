use chain::{ChainError, JobStatus, ValidationError};
use thiserror::Error;
use uuid::Uuid;

// Errores a nivel de petición del motor de cadenas.
//
// Los fallos de un paso o de un documento NO pasan por aquí: se registran
// como datos en `StepResult`/`DocumentResult`. Este enum cubre lo que hace
// que la petición misma no tenga sentido (plantilla inválida, job
// inexistente o sin terminar, configuración rota, etc.).
#[derive(Error, Debug)]
pub enum WorkflowError {
  /// Errores originados por los stores del crate `chain`.
  #[error("Error de cadena: {0}")]
  Chain(ChainError),

  /// La plantilla no pasa el validador de pasos.
  #[error("template failed validation: {0}")]
  Validation(#[from] ValidationError),

  /// Plantilla u otra entidad no encontrada.
  #[error("not found: {0}")]
  NotFound(String),

  #[error("document set is empty")]
  EmptyDocumentSet,

  #[error("duplicate document '{0}' in document set")]
  DuplicateDocument(String),

  #[error("invalid document: {0}")]
  InvalidDocument(String),

  #[error("job {0} not found")]
  JobNotFound(Uuid),

  #[error("job not completed: job {job_id} is {status}")]
  JobNotCompleted { job_id: Uuid, status: JobStatus },

  #[error("document '{document}' is not part of job {job_id}")]
  DocumentNotInJob { job_id: Uuid, document: String },

  /// Variables de entorno con valores inválidos.
  #[error("Error de configuracion: {0}")]
  Config(String),

  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Error de E/S: {0}")]
  Io(#[from] std::io::Error),

  #[error("Otro error: {0}")]
  Other(String),
}

impl From<ChainError> for WorkflowError {
  fn from(e: ChainError) -> Self {
    match e {
      ChainError::Validation(v) => WorkflowError::Validation(v),
      ChainError::NotFound(what) => WorkflowError::NotFound(what),
      other => WorkflowError::Chain(other),
    }
  }
}

impl WorkflowError {
  /// Traduce un `NotFound` genérico del store al error específico del job.
  pub(crate) fn for_job(self, job_id: Uuid) -> Self {
    match self {
      WorkflowError::NotFound(_) => WorkflowError::JobNotFound(job_id),
      other => other,
    }
  }
}

// Archivo: errors.rs
// Propósito: definir los errores del crate (`ChainError`), los errores
// estructurales del validador (`ValidationError`) y el alias Result<T>.
use thiserror::Error;

/// Violaciones estructurales de una lista de pasos.
///
/// Cada variante nombra el paso y la regla incumplida para que la capa que
/// llama pueda mostrar exactamente qué está mal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("chain must contain at least one step")]
    Empty,
    #[error("invalid step number {0}: step numbers start at 1")]
    InvalidStepNumber(u32),
    #[error("duplicate step number {0}")]
    DuplicateStep(u32),
    #[error("non-sequential steps: step {missing} is missing")]
    NonSequential { missing: u32 },
    #[error("step 1 must use original_document input, found {found}")]
    InvalidFirstStep { found: String },
    #[error("step {step} cannot reference step {referenced}: cannot reference self or future steps")]
    ForwardReference { step: u32, referenced: u32 },
    #[error("step {0} references no steps")]
    EmptyReference(u32),
    #[error("step {0} has an empty provider")]
    EmptyProvider(u32),
}

/// Errores comunes de los stores de plantillas y resultados.
///
/// - `NotFound`: entidad no encontrada.
/// - `Conflict`: conflicto de versión (locking optimista).
/// - `Storage`: error al acceder al almacenamiento.
/// - `Validation`: la plantilla no pasa el validador de pasos.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Entidad no encontrada (plantilla, job o resultado).
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Conflicto optimista (version/expected mismatch).
    #[error("Conflicto: {0}")]
    Conflict(String),
    /// Error genérico de almacenamiento (BD, mutex envenenado, etc.).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Plantilla estructuralmente inválida.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// Errores de serialización JSON de payloads persistidos.
    #[error("Error de serializacion: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, ChainError>;

//! ocr-workflow: ejecución y coordinación de cadenas OCR
//!
//! - `ChainExecutor`: corre los pasos de un snapshot sobre un documento.
//! - `JobCoordinator`: lanza jobs, reparte documentos entre workers,
//!   persiste resultados y fija el estado final.
//! - `ExportTransformer`: convierte un job terminado en artefactos.
//!
//! Configuración vía variables de entorno (`EngineConfig::from_env`).
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod executor;
pub mod export;

pub use config::EngineConfig;
pub use coordinator::{check_document_set, documents_from_paths, CancelFlag, JobCoordinator, JobProgress};
pub use errors::WorkflowError;
pub use executor::{resolve_input, ChainExecutor, ResolvedInput};
pub use export::{export_file_names, ExportBundle, ExportTransformer};

use chain::{ResultStore, TemplateStore};
use ocr_providers::CapabilityRegistry;
use std::sync::Arc;

/// Ensambla ejecutor y coordinador sobre los stores y el registro dados.
pub fn build_coordinator(templates: Arc<dyn TemplateStore>,
                         results: Arc<dyn ResultStore>,
                         registry: Arc<CapabilityRegistry>,
                         config: &EngineConfig)
                         -> JobCoordinator {
  let executor = Arc::new(ChainExecutor::new(registry, config.step_timeout));
  JobCoordinator::new(templates, results, executor, config)
}

use crate::errors::WorkflowError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_WORKERS: &str = "OCR_CHAIN_WORKERS";
pub const ENV_STEP_TIMEOUT_MS: &str = "OCR_CHAIN_STEP_TIMEOUT_MS";
pub const ENV_MAX_DELIVERIES: &str = "OCR_CHAIN_MAX_DELIVERIES";
pub const ENV_STORE_RETRIES: &str = "OCR_CHAIN_STORE_RETRIES";
pub const ENV_EXPORT_DIR: &str = "OCR_CHAIN_EXPORT_DIR";

// `.env` se carga una sola vez por proceso.
static DOTENV: Lazy<()> = Lazy::new(|| {
  dotenvy::dotenv().ok();
});

/// Configuración del motor: concurrencia, timeouts y reintentos.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Documentos procesados en paralelo dentro de un job.
  pub workers: usize,
  /// Límite por invocación de proveedor.
  pub step_timeout: Duration,
  /// Entregas máximas de un documento si el worker cae a mitad.
  pub max_deliveries: u32,
  /// Intentos de escritura en el store por documento.
  pub store_retries: u32,
  pub export_dir: PathBuf,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig { workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
                   step_timeout: Duration::from_millis(120_000),
                   max_deliveries: 2,
                   store_retries: 3,
                   export_dir: PathBuf::from("exports") }
  }
}

impl EngineConfig {
  /// Lee la configuración de las variables de entorno (tras cargar `.env`).
  pub fn from_env() -> Result<Self, WorkflowError> {
    Lazy::force(&DOTENV);
    Self::from_vars(|key| std::env::var(key).ok())
  }

  /// Igual que `from_env` pero con una fuente de variables arbitraria.
  /// Valores ausentes toman el default; valores inválidos son error.
  pub fn from_vars<F>(lookup: F) -> Result<Self, WorkflowError>
    where F: Fn(&str) -> Option<String>
  {
    let defaults = EngineConfig::default();
    let workers: usize = parse_var(&lookup, ENV_WORKERS, defaults.workers)?;
    if workers == 0 {
      return Err(WorkflowError::Config(format!("{} must be at least 1", ENV_WORKERS)));
    }
    let timeout_ms: u64 = parse_var(&lookup, ENV_STEP_TIMEOUT_MS, defaults.step_timeout.as_millis() as u64)?;
    if timeout_ms == 0 {
      return Err(WorkflowError::Config(format!("{} must be greater than 0", ENV_STEP_TIMEOUT_MS)));
    }
    let max_deliveries: u32 = parse_var(&lookup, ENV_MAX_DELIVERIES, defaults.max_deliveries)?.max(1);
    let store_retries: u32 = parse_var(&lookup, ENV_STORE_RETRIES, defaults.store_retries)?.max(1);
    let export_dir = lookup(ENV_EXPORT_DIR).filter(|v| !v.trim().is_empty())
                                           .map(PathBuf::from)
                                           .unwrap_or(defaults.export_dir);
    Ok(EngineConfig { workers,
                      step_timeout: Duration::from_millis(timeout_ms),
                      max_deliveries,
                      store_retries,
                      export_dir })
  }

  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
    self.step_timeout = timeout;
    self
  }

  pub fn with_max_deliveries(mut self, deliveries: u32) -> Self {
    self.max_deliveries = deliveries.max(1);
    self
  }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, WorkflowError>
  where T: FromStr,
        T::Err: std::fmt::Display,
        F: Fn(&str) -> Option<String>
{
  match lookup(key) {
    None => Ok(default),
    Some(raw) if raw.trim().is_empty() => Ok(default),
    Some(raw) => raw.trim()
                    .parse::<T>()
                    .map_err(|e| WorkflowError::Config(format!("{}='{}': {}", key, raw, e))),
  }
}

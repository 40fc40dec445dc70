// Archivo: export.rs
// Propósito: transformar un job terminado en un paquete de artefactos
// (detalle completo, línea de tiempo, resumen CSV, documento de
// configuración y textos por documento). Sólo lee del store.
use crate::errors::WorkflowError;
use chain::{ChainJob, DocumentResult, ResultStore, StepKind, TemplateSnapshot, COMBINED_SEPARATOR,
            COMBINED_SEPARATOR_VERSION};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const EXPORT_FORMAT_VERSION: u32 = 1;
pub const FULL_DETAIL_FILE: &str = "results_full.json";
pub const TIMELINE_FILE: &str = "results_timeline.json";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const CONFIG_FILE: &str = "job_config.json";
pub const TEXT_DIR: &str = "text";
/// Prefijo del archivo de texto de un paso fallido.
pub const ERROR_MARKER: &str = "[ERROR]";

const SUMMARY_HEADER: &str = "filename,status,final_output_length,total_time_ms,attempted_steps";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHeader {
  pub job_id: Uuid,
  pub template_id: Uuid,
  pub template_name: String,
  pub template_version: u32,
  pub status: chain::JobStatus,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub total: u64,
  pub processed: u64,
  pub failed: u64,
}

impl From<&ChainJob> for JobHeader {
  fn from(job: &ChainJob) -> Self {
    JobHeader { job_id: job.id,
                template_id: job.template_snapshot.template_id,
                template_name: job.template_snapshot.template_name.clone(),
                template_version: job.template_snapshot.template_version,
                status: job.status,
                created_at: job.created_at,
                completed_at: job.completed_at,
                total: job.total,
                processed: job.processed,
                failed: job.failed }
  }
}

/// Todos los `StepResult` de todos los documentos, sin recortar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullDetailDocument {
  pub export_version: u32,
  pub exported_at: DateTime<Utc>,
  pub job: JobHeader,
  pub documents: Vec<DocumentResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
  pub document_ref: String,
  pub started_at: DateTime<Utc>,
  pub processing_time_ms: u64,
  pub success: bool,
  pub input_length: usize,
  pub output_length: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Un carril por número de paso, con sus ejecuciones en orden cronológico.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineLane {
  pub step_number: u32,
  pub provider: String,
  pub kind: StepKind,
  pub entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineDocument {
  pub export_version: u32,
  pub exported_at: DateTime<Utc>,
  pub job_id: Uuid,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub lanes: Vec<TimelineLane>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
  pub filename: String,
  pub status: chain::DocumentStatus,
  pub final_output_length: usize,
  pub total_time_ms: u64,
  pub attempted_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobTotals {
  pub total: u64,
  pub processed: u64,
  pub succeeded: u64,
  pub failed: u64,
}

/// Lo necesario para reproducir el job: snapshot, totales y separador.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationDocument {
  pub export_version: u32,
  pub exported_at: DateTime<Utc>,
  pub job_id: Uuid,
  pub status: chain::JobStatus,
  pub template_snapshot: TemplateSnapshot,
  pub combined_separator: String,
  pub combined_separator_version: u32,
  /// Pasos que usan cada proveedor, en orden de paso.
  pub provider_usage: IndexMap<String, usize>,
  pub documents: Vec<String>,
  pub totals: JobTotals,
}

/// Resultado de una exportación, independiente del medio de salida.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBundle {
  pub job_id: Uuid,
  pub exported_at: DateTime<Utc>,
  pub full_detail: FullDetailDocument,
  pub timeline: TimelineDocument,
  pub summary: Vec<SummaryRow>,
  pub configuration: ConfigurationDocument,
  /// Ruta relativa (con `/`) => contenido.
  pub text_files: BTreeMap<String, String>,
}

impl ExportBundle {
  pub fn summary_csv(&self) -> String {
    let mut out = String::with_capacity(64 * (self.summary.len() + 1));
    out.push_str(SUMMARY_HEADER);
    out.push('\n');
    for row in &self.summary {
      out.push_str(&format!("{},{},{},{},{}\n",
                            csv_field(&row.filename),
                            row.status,
                            row.final_output_length,
                            row.total_time_ms,
                            row.attempted_steps));
    }
    out
  }

  /// Todos los artefactos como `ruta relativa => bytes`.
  pub fn files(&self) -> Result<BTreeMap<String, Vec<u8>>, WorkflowError> {
    let mut files = BTreeMap::new();
    files.insert(FULL_DETAIL_FILE.to_string(), serde_json::to_vec_pretty(&self.full_detail)?);
    files.insert(TIMELINE_FILE.to_string(), serde_json::to_vec_pretty(&self.timeline)?);
    files.insert(SUMMARY_FILE.to_string(), self.summary_csv().into_bytes());
    files.insert(CONFIG_FILE.to_string(), serde_json::to_vec_pretty(&self.configuration)?);
    for (path, text) in &self.text_files {
      files.insert(path.clone(), text.clone().into_bytes());
    }
    Ok(files)
  }

  /// Escribe el paquete en `base/<job_id>/` y devuelve ese directorio.
  pub fn write_to_dir(&self, base: &Path) -> Result<PathBuf, WorkflowError> {
    let root = base.join(self.job_id.to_string());
    for (rel, bytes) in self.files()? {
      let path = rel.split('/').fold(root.clone(), |acc, part| acc.join(part));
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(&path, bytes)?;
    }
    log::info!("exportación del job {} escrita en {}", self.job_id, root.display());
    Ok(root)
  }
}

fn csv_field(value: &str) -> String {
  if value.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

fn sanitize(name: &str) -> String {
  let cleaned: String = name.chars()
                            .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
                            .collect();
  if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
    "document".to_string()
  } else {
    cleaned
  }
}

fn stem(name: &str) -> &str {
  match name.rfind('.') {
    Some(idx) if idx > 0 => &name[..idx],
    _ => name,
  }
}

/// Nombre base de archivo para cada documento. Usa el stem; si dos
/// documentos comparten stem usa el nombre completo; si aún colisionan
/// añade el primer sufijo numérico libre. Los nombres que salen sin sufijo
/// se reservan antes de asignar sufijos, así ningún sufijo pisa el stem de
/// otro documento. `names` debe venir ordenado.
pub fn export_file_names(names: &[&str]) -> HashMap<String, String> {
  let mut stem_counts: HashMap<String, usize> = HashMap::new();
  for name in names {
    *stem_counts.entry(sanitize(stem(name))).or_default() += 1;
  }
  let bases: Vec<String> = names.iter()
                                .map(|name| {
                                  let s = sanitize(stem(name));
                                  if stem_counts[&s] > 1 { sanitize(name) } else { s }
                                })
                                .collect();

  let mut assigned: HashSet<String> = HashSet::with_capacity(names.len());
  let mut out = HashMap::with_capacity(names.len());
  let mut pending = Vec::new();
  for (name, base) in names.iter().zip(&bases) {
    if assigned.insert(base.clone()) {
      out.insert(name.to_string(), base.clone());
    } else {
      pending.push((*name, base));
    }
  }
  for (name, base) in pending {
    let mut n = 2usize;
    let unique = loop {
      let candidate = format!("{}_{}", base, n);
      if !assigned.contains(&candidate) {
        break candidate;
      }
      n += 1;
    };
    assigned.insert(unique.clone());
    out.insert(name.to_string(), unique);
  }
  out
}

/// Genera exportaciones a partir del `ResultStore`.
pub struct ExportTransformer {
  store: Arc<dyn ResultStore>,
}

impl ExportTransformer {
  pub fn new(store: Arc<dyn ResultStore>) -> Self {
    Self { store }
  }

  pub fn export(&self, job_id: &Uuid) -> Result<ExportBundle, WorkflowError> {
    self.export_at(job_id, Utc::now())
  }

  /// Igual que `export` con la marca de tiempo fijada: dos llamadas con el
  /// mismo instante sobre el mismo store producen el mismo paquete.
  pub fn export_at(&self, job_id: &Uuid, exported_at: DateTime<Utc>) -> Result<ExportBundle, WorkflowError> {
    let job = self.store
                  .get_job(job_id)
                  .map_err(|e| WorkflowError::from(e).for_job(*job_id))?;
    if !job.status.is_exportable() {
      return Err(WorkflowError::JobNotCompleted { job_id: *job_id, status: job.status });
    }
    let mut documents = self.store.list_document_results(job_id)?;
    documents.sort_by(|a, b| a.document_ref.cmp(&b.document_ref));

    let summary = build_summary(&documents);
    let timeline = build_timeline(&job, &documents, exported_at);
    let configuration = build_configuration(&job, &documents, exported_at);
    let text_files = build_text_files(&documents);
    let full_detail = FullDetailDocument { export_version: EXPORT_FORMAT_VERSION,
                                           exported_at,
                                           job: JobHeader::from(&job),
                                           documents };
    log::debug!("job {}: exportados {} documentos y {} textos",
                job_id,
                full_detail.documents.len(),
                text_files.len());
    Ok(ExportBundle { job_id: *job_id,
                      exported_at,
                      full_detail,
                      timeline,
                      summary,
                      configuration,
                      text_files })
  }
}

fn build_summary(documents: &[DocumentResult]) -> Vec<SummaryRow> {
  documents.iter()
           .map(|d| SummaryRow { filename: d.document_ref.clone(),
                                 status: d.status,
                                 final_output_length: d.final_output.chars().count(),
                                 total_time_ms: d.total_time_ms,
                                 attempted_steps: d.attempted_steps() })
           .collect()
}

fn build_timeline(job: &ChainJob, documents: &[DocumentResult], exported_at: DateTime<Utc>) -> TimelineDocument {
  let mut records: Vec<(&str, &chain::StepResult)> =
    documents.iter().flat_map(|d| d.steps.iter().map(move |s| (d.document_ref.as_str(), s))).collect();
  records.sort_by(|a, b| {
           a.1.step_number
            .cmp(&b.1.step_number)
            .then(a.1.metadata.timestamp.cmp(&b.1.metadata.timestamp))
            .then(a.0.cmp(b.0))
         });

  let mut lanes: IndexMap<u32, TimelineLane> = IndexMap::new();
  for (doc, step) in &records {
    let lane = lanes.entry(step.step_number).or_insert_with(|| TimelineLane { step_number: step.step_number,
                                                                              provider: step.provider.clone(),
                                                                              kind: step.kind,
                                                                              entries: Vec::new() });
    lane.entries.push(TimelineEntry { document_ref: doc.to_string(),
                                      started_at: step.metadata.timestamp,
                                      processing_time_ms: step.metadata.processing_time_ms,
                                      success: step.is_success(),
                                      input_length: step.metadata.input_length,
                                      output_length: step.metadata.output_length,
                                      error: step.error().map(str::to_string) });
  }

  let started_at = records.iter().map(|(_, s)| s.metadata.timestamp).min();
  let finished_at = records.iter()
                           .map(|(_, s)| {
                             s.metadata.timestamp
                             + chrono::Duration::milliseconds(s.metadata.processing_time_ms as i64)
                           })
                           .max();
  TimelineDocument { export_version: EXPORT_FORMAT_VERSION,
                     exported_at,
                     job_id: job.id,
                     started_at,
                     finished_at,
                     lanes: lanes.into_values().collect() }
}

fn build_configuration(job: &ChainJob,
                       documents: &[DocumentResult],
                       exported_at: DateTime<Utc>)
                       -> ConfigurationDocument {
  let mut provider_usage: IndexMap<String, usize> = IndexMap::new();
  for step in job.template_snapshot.enabled_steps() {
    *provider_usage.entry(step.provider.clone()).or_default() += 1;
  }
  let failed = documents.iter().filter(|d| d.status.counts_as_failure()).count() as u64;
  ConfigurationDocument { export_version: EXPORT_FORMAT_VERSION,
                          exported_at,
                          job_id: job.id,
                          status: job.status,
                          template_snapshot: job.template_snapshot.clone(),
                          combined_separator: COMBINED_SEPARATOR.to_string(),
                          combined_separator_version: COMBINED_SEPARATOR_VERSION,
                          provider_usage,
                          documents: job.document_set.iter().map(|d| d.name.clone()).collect(),
                          totals: JobTotals { total: job.total,
                                              processed: documents.len() as u64,
                                              succeeded: documents.len() as u64 - failed,
                                              failed } }
}

/// `text/final/<doc>.txt` y `text/steps/<n>/<doc>.txt` por documento.
fn build_text_files(documents: &[DocumentResult]) -> BTreeMap<String, String> {
  let names: Vec<&str> = documents.iter().map(|d| d.document_ref.as_str()).collect();
  let file_names = export_file_names(&names);
  documents.par_iter()
           .flat_map_iter(|doc| {
             let base = file_names.get(&doc.document_ref).cloned().unwrap_or_else(|| sanitize(&doc.document_ref));
             let mut files = Vec::with_capacity(doc.steps.len() + 1);
             files.push((format!("{}/final/{}.txt", TEXT_DIR, base), doc.final_output.clone()));
             for step in &doc.steps {
               let body = match step.error() {
                 Some(e) => format!("{} {}", ERROR_MARKER, e),
                 None => step.output_text().unwrap_or_default().to_string(),
               };
               files.push((format!("{}/steps/{}/{}.txt", TEXT_DIR, step.step_number, base), body));
             }
             files
           })
           .collect()
}

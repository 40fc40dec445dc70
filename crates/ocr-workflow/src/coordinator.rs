// Archivo: coordinator.rs
// Propósito: ciclo de vida de los jobs. Congela la plantilla, reparte los
// documentos entre un número acotado de workers, persiste cada resultado de
// forma idempotente y cierra el job con su estado final.
use crate::config::EngineConfig;
use crate::errors::WorkflowError;
use crate::executor::ChainExecutor;
use chain::{validate_steps, ChainJob, ChainTemplate, DocumentRef, DocumentResult, DocumentStatus, JobStatus,
            ProgressDelta, PutOutcome, ResultStore, TemplateSnapshot, TemplateStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Bandera de cancelación compartida con la tarea del job.
#[derive(Clone, Default, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Vista de progreso de un job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
  pub job_id: Uuid,
  pub status: JobStatus,
  pub total: u64,
  pub processed: u64,
  pub failed: u64,
  pub remaining: u64,
  pub percent: f64,
  pub created_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ChainJob> for JobProgress {
  fn from(job: &ChainJob) -> Self {
    JobProgress { job_id: job.id,
                  status: job.status,
                  total: job.total,
                  processed: job.processed,
                  failed: job.failed,
                  remaining: job.remaining(),
                  percent: job.progress_percent(),
                  created_at: job.created_at,
                  completed_at: job.completed_at }
  }
}

/// Desenlace del procesamiento de un documento.
#[derive(Debug, Clone, PartialEq)]
enum DocumentOutcome {
  Persisted(DocumentStatus),
  Lost(String),
}

/// Job con tarea viva en este proceso. `done` pasa a `true` cuando la
/// tarea fija el estado final.
struct RunningJob {
  cancel: CancelFlag,
  done: watch::Receiver<bool>,
}

/// Valida un conjunto de documentos: no vacío, nombres no vacíos y únicos.
pub fn check_document_set(documents: &[DocumentRef]) -> Result<(), WorkflowError> {
  if documents.is_empty() {
    return Err(WorkflowError::EmptyDocumentSet);
  }
  let mut seen = HashSet::with_capacity(documents.len());
  for doc in documents {
    if doc.name.trim().is_empty() {
      return Err(WorkflowError::InvalidDocument(doc.path.display().to_string()));
    }
    if !seen.insert(doc.name.as_str()) {
      return Err(WorkflowError::DuplicateDocument(doc.name.clone()));
    }
  }
  Ok(())
}

/// Construye referencias a partir de rutas; el nombre es el nombre de archivo.
pub fn documents_from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DocumentRef>, WorkflowError> {
  paths.iter()
       .map(|p| {
         DocumentRef::from_path(p.as_ref())
           .ok_or_else(|| WorkflowError::InvalidDocument(p.as_ref().display().to_string()))
       })
       .collect()
}

/// Parte clonable que viaja a las tareas de tokio.
#[derive(Clone)]
struct Dispatcher {
  store: Arc<dyn ResultStore>,
  executor: Arc<ChainExecutor>,
  workers: usize,
  max_deliveries: u32,
  store_retries: u32,
}

impl Dispatcher {
  /// Ejecuta una escritura/lectura del store fuera del runtime async.
  async fn with_store<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where F: FnOnce(&dyn ResultStore) -> chain::Result<T> + Send + 'static,
          T: Send + 'static
  {
    let store = self.store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref())).await
                                                         .map_err(|e| {
                                                           WorkflowError::Other(format!("store task failed: {}", e))
                                                         })?
                                                         .map_err(WorkflowError::from)
  }

  /// Marca el job como `processing`, con reintentos.
  async fn mark_processing(&self, job_id: Uuid) -> Result<(), WorkflowError> {
    let mut last = None;
    for attempt in 1..=self.store_retries {
      match self.with_store(move |s| s.set_job_status(&job_id, JobStatus::Processing)).await {
        Ok(_) => return Ok(()),
        Err(e) => {
          log::warn!("job {}: no se pudo marcar como processing (intento {}): {}", job_id, attempt, e);
          last = Some(e);
        }
      }
    }
    Err(last.unwrap_or_else(|| WorkflowError::Other("store_retries is zero".into())))
  }

  /// Alinea los contadores con los resultados guardados. Sólo es válido sin
  /// otra tarea escribiendo el job (al recuperarlo tras un reinicio).
  async fn reconcile(&self, job: &ChainJob, stored: &[DocumentResult]) -> Result<(), WorkflowError> {
    let processed = stored.len() as i64;
    let failed = stored.iter().filter(|r| r.status.counts_as_failure()).count() as i64;
    let delta = ProgressDelta { processed: processed - job.processed as i64,
                                failed: failed - job.failed as i64 };
    if delta.is_noop() {
      return Ok(());
    }
    log::warn!("job {}: contadores desalineados ({}/{} procesados, {} resultados guardados); se corrigen",
               job.id,
               job.processed,
               job.total,
               processed);
    let job_id = job.id;
    self.with_store(move |s| s.record_progress(&job_id, delta)).await?;
    Ok(())
  }

  /// Procesa `pending` (un subconjunto de `job.document_set`) y cierra el job.
  async fn run_job(self, job: ChainJob, pending: Vec<DocumentRef>, cancel: CancelFlag) {
    let job_id = job.id;
    let total = pending.len();
    if let Err(e) = self.mark_processing(job_id).await {
      log::error!("job {}: no arranca, se marca como error: {}", job_id, e);
      if let Err(e) = self.with_store(move |s| s.set_job_status(&job_id, JobStatus::Error)).await {
        log::error!("job {}: tampoco se pudo marcar como error: {}", job_id, e);
      }
      return;
    }
    log::info!("job {}: procesando {} documentos con {} workers", job_id, total, self.workers);

    let snapshot = Arc::new(job.template_snapshot);
    let semaphore = Arc::new(Semaphore::new(self.workers));
    let mut tasks = JoinSet::new();
    let mut dispatched = 0usize;
    for document in pending {
      let permit = match semaphore.clone().acquire_owned().await {
        Ok(p) => p,
        Err(_) => break,
      };
      if cancel.is_cancelled() {
        log::info!("job {}: cancelado con {} de {} documentos despachados", job_id, dispatched, total);
        break;
      }
      let dispatcher = self.clone();
      let snapshot = snapshot.clone();
      tasks.spawn(async move {
             let _permit = permit;
             let outcome = dispatcher.process_document(job_id, snapshot, document.clone()).await;
             (document.name, outcome)
           });
      dispatched += 1;
    }

    let mut lost = 0usize;
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((_, DocumentOutcome::Persisted(_))) => {}
        Ok((name, DocumentOutcome::Lost(reason))) => {
          log::error!("job {}: documento '{}' perdido: {}", job_id, name, reason);
          lost += 1;
        }
        Err(e) => {
          log::error!("job {}: tarea de documento abortada: {}", job_id, e);
          lost += 1;
        }
      }
    }

    let final_status = if lost > 0 {
      JobStatus::Error
    } else if dispatched < total {
      JobStatus::Cancelled
    } else {
      match self.with_store(move |s| s.get_job(&job_id)).await {
        Ok(current) => current.settled_status().unwrap_or(JobStatus::Error),
        Err(e) => {
          log::error!("job {}: no se pudo leer el progreso: {}", job_id, e);
          JobStatus::Error
        }
      }
    };
    match self.with_store(move |s| s.set_job_status(&job_id, final_status)).await {
      Ok(job) => log::info!("job {}: {} ({} procesados, {} fallidos)", job_id, job.status, job.processed, job.failed),
      Err(e) => log::error!("job {}: no se pudo fijar el estado final {}: {}", job_id, final_status, e),
    }
  }

  /// Procesa un documento con re-entrega si el worker entra en pánico.
  async fn process_document(&self,
                            job_id: Uuid,
                            snapshot: Arc<TemplateSnapshot>,
                            document: DocumentRef)
                            -> DocumentOutcome {
    for delivery in 1..=self.max_deliveries {
      let executor = self.executor.clone();
      let snapshot = snapshot.clone();
      let doc = document.clone();
      let run = tokio::spawn(async move { executor.execute(&snapshot, &doc).await });
      match run.await {
        Ok(result) => return self.persist(job_id, result).await,
        Err(e) if e.is_panic() => {
          log::warn!("job {}: '{}' entrega {}/{} caída; se reintenta",
                     job_id,
                     document.name,
                     delivery,
                     self.max_deliveries);
        }
        Err(e) => return DocumentOutcome::Lost(format!("worker cancelled: {}", e)),
      }
    }
    DocumentOutcome::Lost(format!("all {} deliveries crashed", self.max_deliveries))
  }

  /// Upsert del resultado y ajuste de contadores, cada uno con reintentos.
  async fn persist(&self, job_id: Uuid, result: DocumentResult) -> DocumentOutcome {
    let status = result.status;
    let result = Arc::new(result);
    let mut last_err = String::new();

    let mut put: Option<PutOutcome> = None;
    for attempt in 1..=self.store_retries {
      let r = result.clone();
      match self.with_store(move |s| s.put_document_result(&job_id, &r.document_ref, &r)).await {
        Ok(outcome) => {
          put = Some(outcome);
          break;
        }
        Err(e) => {
          log::warn!("job {}: escritura de '{}' fallida (intento {}): {}", job_id, result.document_ref, attempt, e);
          last_err = e.to_string();
        }
      }
    }
    let Some(outcome) = put else {
      return DocumentOutcome::Lost(format!("could not persist result: {}", last_err));
    };

    let delta = ProgressDelta::for_put(outcome, status);
    if delta.is_noop() {
      return DocumentOutcome::Persisted(status);
    }
    for attempt in 1..=self.store_retries {
      match self.with_store(move |s| s.record_progress(&job_id, delta)).await {
        Ok(job) => {
          log::debug!("job {}: {}/{} procesados", job_id, job.processed, job.total);
          return DocumentOutcome::Persisted(status);
        }
        Err(e) => {
          log::warn!("job {}: contadores no actualizados (intento {}): {}", job_id, attempt, e);
          last_err = e.to_string();
        }
      }
    }
    DocumentOutcome::Lost(format!("could not record progress: {}", last_err))
  }
}

/// Coordinador de jobs.
pub struct JobCoordinator {
  templates: Arc<dyn TemplateStore>,
  dispatcher: Dispatcher,
  running: Arc<DashMap<Uuid, RunningJob>>,
}

impl JobCoordinator {
  pub fn new(templates: Arc<dyn TemplateStore>,
             store: Arc<dyn ResultStore>,
             executor: Arc<ChainExecutor>,
             config: &EngineConfig)
             -> Self {
    let dispatcher = Dispatcher { store,
                                  executor,
                                  workers: config.workers.max(1),
                                  max_deliveries: config.max_deliveries.max(1),
                                  store_retries: config.store_retries.max(1) };
    Self { templates, dispatcher, running: Arc::new(DashMap::new()) }
  }

  /// Arranca la tarea de un job. La entrada en `running` existe antes de
  /// que la tarea corra y la tarea la retira al terminar.
  fn spawn_run(&self, job: ChainJob, pending: Vec<DocumentRef>) {
    let job_id = job.id;
    let cancel = CancelFlag::default();
    let (done_tx, done_rx) = watch::channel(false);
    self.running.insert(job_id, RunningJob { cancel: cancel.clone(), done: done_rx });
    let dispatcher = self.dispatcher.clone();
    let running = self.running.clone();
    tokio::spawn(async move {
      dispatcher.run_job(job, pending, cancel).await;
      running.remove(&job_id);
      done_tx.send_replace(true);
    });
  }

  pub fn result_store(&self) -> Arc<dyn ResultStore> {
    self.dispatcher.store.clone()
  }

  pub fn template_store(&self) -> Arc<dyn TemplateStore> {
    self.templates.clone()
  }

  /// Lanza un job con la plantilla guardada `template_id`.
  pub async fn launch(&self, template_id: &Uuid, documents: Vec<DocumentRef>) -> Result<Uuid, WorkflowError> {
    let template = self.templates.get_template(template_id)?;
    self.launch_template(&template, documents).await
  }

  /// Lanza un job congelando `template` en este instante. Ediciones
  /// posteriores de la plantilla no afectan al job.
  pub async fn launch_template(&self,
                               template: &ChainTemplate,
                               documents: Vec<DocumentRef>)
                               -> Result<Uuid, WorkflowError> {
    validate_steps(&template.steps)?;
    check_document_set(&documents)?;
    let job = ChainJob::new(template.snapshot(), documents);
    let job_id = job.id;
    let stored = job.clone();
    self.dispatcher.with_store(move |s| s.create_job(&stored)).await?;

    let pending = job.document_set.clone();
    self.spawn_run(job, pending);
    log::info!("job {} lanzado con plantilla '{}' v{}", job_id, template.name, template.version);
    Ok(job_id)
  }

  /// Reanuda los jobs no terminales que no tienen tarea en este proceso
  /// (p.ej. tras un reinicio). Sólo se despachan los documentos sin
  /// resultado guardado; antes se alinean los contadores con esos
  /// resultados. Devuelve los ids reanudados.
  pub async fn recover(&self) -> Result<Vec<Uuid>, WorkflowError> {
    let jobs = self.dispatcher.with_store(|s| s.list_jobs()).await?;
    let mut resumed = Vec::new();
    for job in jobs {
      if job.status.is_terminal() || self.running.contains_key(&job.id) {
        continue;
      }
      let job_id = job.id;
      let stored = self.dispatcher.with_store(move |s| s.list_document_results(&job_id)).await?;
      self.dispatcher.reconcile(&job, &stored).await?;
      let done: HashSet<&str> = stored.iter().map(|r| r.document_ref.as_str()).collect();
      let pending: Vec<DocumentRef> = job.document_set
                                         .iter()
                                         .filter(|d| !done.contains(d.name.as_str()))
                                         .cloned()
                                         .collect();
      log::info!("job {}: reanudado desde '{}' con {} documentos pendientes", job_id, job.status, pending.len());
      self.spawn_run(job, pending);
      resumed.push(job_id);
    }
    Ok(resumed)
  }

  /// Jobs con tarea viva en este proceso.
  pub fn running_jobs(&self) -> Vec<Uuid> {
    self.running.iter().map(|e| *e.key()).collect()
  }

  pub fn status(&self, job_id: &Uuid) -> Result<JobProgress, WorkflowError> {
    let job = self.job(job_id)?;
    Ok(JobProgress::from(&job))
  }

  pub fn job(&self, job_id: &Uuid) -> Result<ChainJob, WorkflowError> {
    self.dispatcher
        .store
        .get_job(job_id)
        .map_err(|e| WorkflowError::from(e).for_job(*job_id))
  }

  pub fn list_jobs(&self) -> Result<Vec<JobProgress>, WorkflowError> {
    Ok(self.dispatcher.store.list_jobs()?.iter().map(JobProgress::from).collect())
  }

  /// Resultados disponibles hasta ahora (el job puede seguir en curso).
  pub fn results(&self, job_id: &Uuid) -> Result<Vec<DocumentResult>, WorkflowError> {
    self.job(job_id)?;
    Ok(self.dispatcher.store.list_document_results(job_id)?)
  }

  /// Pide la cancelación: los documentos ya despachados terminan, el resto no
  /// se procesa. Devuelve `false` si el job ya no está en curso.
  pub fn cancel(&self, job_id: &Uuid) -> Result<bool, WorkflowError> {
    if let Some(running) = self.running.get(job_id) {
      let active = !*running.done.borrow();
      if active {
        running.cancel.cancel();
        log::info!("job {}: cancelación solicitada", job_id);
        return Ok(true);
      }
    }
    self.job(job_id)?;
    Ok(false)
  }

  /// Espera a que el job termine y devuelve su estado final. Varios
  /// llamadores pueden esperar el mismo job a la vez.
  pub async fn wait(&self, job_id: &Uuid) -> Result<ChainJob, WorkflowError> {
    let done = self.running.get(job_id).map(|r| r.done.clone());
    if let Some(mut done) = done {
      if done.wait_for(|finished| *finished).await.is_err() {
        log::warn!("job {}: la tarea terminó sin cerrar el job", job_id);
      }
    }
    self.job(job_id)
  }

  /// Reprocesa un documento del job con el mismo snapshot. El resultado
  /// reemplaza al anterior sin contar dos veces.
  pub async fn resubmit(&self, job_id: &Uuid, document: &str) -> Result<DocumentResult, WorkflowError> {
    let job = self.job(job_id)?;
    let doc = job.document(document)
                 .cloned()
                 .ok_or_else(|| WorkflowError::DocumentNotInJob { job_id: *job_id, document: document.to_string() })?;
    let snapshot = Arc::new(job.template_snapshot.clone());
    match self.dispatcher.process_document(*job_id, snapshot, doc).await {
      DocumentOutcome::Persisted(status) => log::info!("job {}: '{}' reprocesado: {}", job_id, document, status),
      DocumentOutcome::Lost(reason) => return Err(WorkflowError::Other(reason)),
    }

    let id = *job_id;
    let current = self.dispatcher.with_store(move |s| s.get_job(&id)).await?;
    if current.status.is_terminal() {
      if let Some(settled) = current.settled_status() {
        if settled != current.status {
          self.dispatcher.with_store(move |s| s.set_job_status(&id, settled)).await?;
        }
      }
    }
    let name = document.to_string();
    self.dispatcher
        .with_store(move |s| s.get_document_result(&id, &name))
        .await?
        .ok_or_else(|| WorkflowError::Other(format!("result for '{}' missing after resubmit", document)))
  }
}

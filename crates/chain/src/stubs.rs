// Archivo: stubs.rs
// Propósito: implementaciones en memoria de `TemplateStore` y `ResultStore`
// para pruebas, demos y ejecución local. No son durables.
use crate::domain::{apply_delta, normalize_steps, ChainJob, ChainStep, ChainTemplate, DocumentResult, JobStatus,
                    ProgressDelta, PutOutcome};
use crate::errors::{ChainError, Result};
use crate::repository::{ResultStore, TemplateStore};
use crate::validation::validate_steps;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Store de plantillas en memoria.
pub struct InMemoryTemplateStore {
    templates: Mutex<HashMap<Uuid, ChainTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self { templates: Mutex::new(HashMap::new()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `ChainError::Storage`.
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, ChainTemplate>>> {
        self.templates
            .lock()
            .map_err(|e| ChainError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn create_template(&self, mut template: ChainTemplate) -> Result<ChainTemplate> {
        validate_steps(&template.steps)?;
        template.steps = normalize_steps(template.steps);
        let mut map = self.lock()?;
        if map.contains_key(&template.id) {
            return Err(ChainError::Conflict(format!("template {} already exists", template.id)));
        }
        map.insert(template.id, template.clone());
        log::debug!("template {} '{}' created", template.id, template.name);
        Ok(template)
    }

    fn get_template(&self, id: &Uuid) -> Result<ChainTemplate> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("template {}", id)))
    }

    fn update_template(&self, id: &Uuid, steps: Vec<ChainStep>, expected_version: u32) -> Result<ChainTemplate> {
        validate_steps(&steps)?;
        let mut map = self.lock()?;
        let current = map.get_mut(id)
                         .ok_or_else(|| ChainError::NotFound(format!("template {}", id)))?;
        if current.version != expected_version {
            return Err(ChainError::Conflict(format!("template {} is at version {}, expected {}",
                                                    id, current.version, expected_version)));
        }
        current.steps = normalize_steps(steps);
        current.version += 1;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    fn delete_template(&self, id: &Uuid) -> Result<()> {
        self.lock()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ChainError::NotFound(format!("template {}", id)))
    }

    fn list_templates(&self, owner: Option<&str>) -> Result<Vec<ChainTemplate>> {
        let map = self.lock()?;
        let mut out: Vec<ChainTemplate> = map.values()
                                             .filter(|t| owner.map_or(true, |o| t.owner == o))
                                             .cloned()
                                             .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

/// Store de resultados en memoria.
///
/// Jobs y resultados viven en `DashMap` (sharded): escritores sobre claves
/// `(job_id, document_ref)` distintas no comparten un lock global.
pub struct InMemoryResultStore {
    jobs: DashMap<Uuid, ChainJob>,
    results: DashMap<(Uuid, String), DocumentResult>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self { jobs: DashMap::new(), results: DashMap::new() }
    }

    fn ensure_job(&self, job_id: &Uuid) -> Result<()> {
        if self.jobs.contains_key(job_id) {
            Ok(())
        } else {
            Err(ChainError::NotFound(format!("job {}", job_id)))
        }
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore for InMemoryResultStore {
    fn create_job(&self, job: &ChainJob) -> Result<()> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(ChainError::Conflict(format!("job {} already exists", job.id))),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    fn get_job(&self, job_id: &Uuid) -> Result<ChainJob> {
        self.jobs
            .get(job_id)
            .map(|j| j.value().clone())
            .ok_or_else(|| ChainError::NotFound(format!("job {}", job_id)))
    }

    fn list_jobs(&self) -> Result<Vec<ChainJob>> {
        let mut out: Vec<ChainJob> = self.jobs.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    fn set_job_status(&self, job_id: &Uuid, status: JobStatus) -> Result<ChainJob> {
        let mut job = self.jobs
                          .get_mut(job_id)
                          .ok_or_else(|| ChainError::NotFound(format!("job {}", job_id)))?;
        job.status = status;
        job.completed_at = if status.is_terminal() { Some(Utc::now()) } else { None };
        Ok(job.clone())
    }

    fn record_progress(&self, job_id: &Uuid, delta: ProgressDelta) -> Result<ChainJob> {
        let mut job = self.jobs
                          .get_mut(job_id)
                          .ok_or_else(|| ChainError::NotFound(format!("job {}", job_id)))?;
        job.processed = apply_delta(job.processed, delta.processed).min(job.total);
        job.failed = apply_delta(job.failed, delta.failed).min(job.processed);
        Ok(job.clone())
    }

    fn put_document_result(&self, job_id: &Uuid, document_ref: &str, result: &DocumentResult) -> Result<PutOutcome> {
        self.ensure_job(job_id)?;
        let previous = self.results.insert((*job_id, document_ref.to_string()), result.clone());
        Ok(match previous {
            Some(prev) => PutOutcome::Replaced { previous: prev.status },
            None => PutOutcome::Inserted,
        })
    }

    fn get_document_result(&self, job_id: &Uuid, document_ref: &str) -> Result<Option<DocumentResult>> {
        self.ensure_job(job_id)?;
        Ok(self.results
               .get(&(*job_id, document_ref.to_string()))
               .map(|r| r.value().clone()))
    }

    fn list_document_results(&self, job_id: &Uuid) -> Result<Vec<DocumentResult>> {
        self.ensure_job(job_id)?;
        let mut out: Vec<DocumentResult> = self.results
                                               .iter()
                                               .filter(|e| e.key().0 == *job_id)
                                               .map(|e| e.value().clone())
                                               .collect();
        out.sort_by(|a, b| a.document_ref.cmp(&b.document_ref));
        Ok(out)
    }
}

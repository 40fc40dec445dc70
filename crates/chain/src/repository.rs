// Archivo: repository.rs
// Propósito: contratos de persistencia. `TemplateStore` guarda plantillas
// validadas; `ResultStore` guarda jobs y resultados por documento. Las
// implementaciones concretas (memoria, SQLite) viven en otros módulos/crates.
use crate::domain::{ChainJob, ChainStep, ChainTemplate, DocumentResult, JobStatus, ProgressDelta, PutOutcome};
use crate::errors::Result;
use uuid::Uuid;

/// CRUD de plantillas. Toda escritura pasa por el validador de pasos.
pub trait TemplateStore: Send + Sync {
    /// Guarda una plantilla nueva y devuelve la versión almacenada.
    fn create_template(&self, template: ChainTemplate) -> Result<ChainTemplate>;

    /// Obtiene una plantilla por id. `NotFound` si no existe.
    fn get_template(&self, id: &Uuid) -> Result<ChainTemplate>;

    /// Reemplaza los pasos. `expected_version` implementa locking optimista:
    /// si no coincide con la versión actual devuelve `Conflict`. La versión
    /// sube en 1 con cada edición aceptada.
    fn update_template(&self, id: &Uuid, steps: Vec<ChainStep>, expected_version: u32) -> Result<ChainTemplate>;

    fn delete_template(&self, id: &Uuid) -> Result<()>;

    /// Lista plantillas, opcionalmente filtradas por propietario; ordenadas
    /// por nombre.
    fn list_templates(&self, owner: Option<&str>) -> Result<Vec<ChainTemplate>>;
}

/// Registro durable de jobs y resultados.
///
/// Debe admitir escritores concurrentes sobre claves `(job_id,
/// document_ref)` distintas y lecturas mientras el job sigue en
/// `processing`.
pub trait ResultStore: Send + Sync {
    /// Inserta el job recién creado. `Conflict` si el id ya existe.
    fn create_job(&self, job: &ChainJob) -> Result<()>;

    fn get_job(&self, job_id: &Uuid) -> Result<ChainJob>;

    /// Jobs ordenados por fecha de creación.
    fn list_jobs(&self) -> Result<Vec<ChainJob>>;

    /// Cambia el estado del job. Al pasar a un estado terminal se fija
    /// `completed_at`.
    fn set_job_status(&self, job_id: &Uuid, status: JobStatus) -> Result<ChainJob>;

    /// Aplica un delta a los contadores de forma atómica y devuelve el job
    /// actualizado.
    fn record_progress(&self, job_id: &Uuid, delta: ProgressDelta) -> Result<ChainJob>;

    /// Upsert idempotente: un segundo put con la misma clave reemplaza el
    /// resultado anterior. El resultado se escribe completo o no se escribe.
    fn put_document_result(&self, job_id: &Uuid, document_ref: &str, result: &DocumentResult) -> Result<PutOutcome>;

    fn get_document_result(&self, job_id: &Uuid, document_ref: &str) -> Result<Option<DocumentResult>>;

    /// Resultados del job ordenados por `document_ref`.
    fn list_document_results(&self, job_id: &Uuid) -> Result<Vec<DocumentResult>>;
}

use crate::schema;
use crate::schema::document_results::dsl as results_dsl;
use crate::schema::jobs::dsl as jobs_dsl;
use crate::schema::templates::dsl as templates_dsl;
use chain::{apply_delta, normalize_steps, validate_steps, ChainError, ChainJob, ChainStep, ChainTemplate,
            DocumentResult, DocumentStatus, JobStatus, ProgressDelta, PutOutcome, ResultStore, TemplateStore};
use chrono::{DateTime, TimeZone, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
pub const ENV_DB_URL: &str = "OCR_CHAIN_DB_URL";
pub const DEFAULT_DB_URL: &str = "ocr_chain.db";

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;
type Result<T> = std::result::Result<T, ChainError>;

/// Error interno de las transacciones: Diesel exige `From<diesel::Error>`.
#[derive(Debug, thiserror::Error)]
enum TxError {
  #[error("db: {0}")]
  Db(#[from] DieselError),
  #[error(transparent)]
  Chain(#[from] ChainError),
}

impl From<serde_json::Error> for TxError {
  fn from(e: serde_json::Error) -> Self {
    TxError::Chain(ChainError::Serialization(e))
  }
}

impl From<TxError> for ChainError {
  fn from(e: TxError) -> Self {
    match e {
      TxError::Db(e) => map_db_err(e),
      TxError::Chain(c) => c,
    }
  }
}

fn map_db_err(e: DieselError) -> ChainError {
  match e {
    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
      ChainError::Conflict(info.message().to_string())
    }
    other => ChainError::Storage(format!("db: {}", other)),
  }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
  ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  Utc.timestamp_millis_opt(ms)
     .single()
     .ok_or_else(|| ChainError::Storage(format!("invalid timestamp {}", ms)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| ChainError::Storage(format!("invalid uuid '{}': {}", s, e)))
}

/// PRAGMAs por conexión: espera ante locks y claves foráneas activas.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::templates)]
struct TemplateRow {
  pub id: String,
  pub name: String,
  pub owner: String,
  pub version: i64,
  pub payload: String,
  pub updated_at_ts: i64,
}

impl TemplateRow {
  fn from_domain(t: &ChainTemplate) -> Result<Self> {
    Ok(TemplateRow { id: t.id.to_string(),
                     name: t.name.clone(),
                     owner: t.owner.clone(),
                     version: t.version as i64,
                     payload: serde_json::to_string(t)?,
                     updated_at_ts: to_millis(t.updated_at) })
  }

  fn into_domain(self) -> Result<ChainTemplate> {
    Ok(serde_json::from_str(&self.payload)?)
  }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::jobs)]
struct JobRow {
  pub id: String,
  pub template_id: String,
  pub status: String,
  pub template_snapshot: String,
  pub document_set: String,
  pub created_at_ts: i64,
  pub completed_at_ts: Option<i64>,
  pub total: i64,
  pub processed: i64,
  pub failed: i64,
}

impl JobRow {
  fn from_domain(job: &ChainJob) -> Result<Self> {
    Ok(JobRow { id: job.id.to_string(),
                template_id: job.template_snapshot.template_id.to_string(),
                status: job.status.as_str().to_string(),
                template_snapshot: serde_json::to_string(&job.template_snapshot)?,
                document_set: serde_json::to_string(&job.document_set)?,
                created_at_ts: to_millis(job.created_at),
                completed_at_ts: job.completed_at.map(to_millis),
                total: job.total as i64,
                processed: job.processed as i64,
                failed: job.failed as i64 })
  }

  fn into_domain(self) -> Result<ChainJob> {
    let status = JobStatus::parse(&self.status).ok_or_else(|| {
                                                 ChainError::Storage(format!("unknown job status '{}'", self.status))
                                               })?;
    Ok(ChainJob { id: parse_uuid(&self.id)?,
                  template_snapshot: serde_json::from_str(&self.template_snapshot)?,
                  document_set: serde_json::from_str(&self.document_set)?,
                  status,
                  created_at: from_millis(self.created_at_ts)?,
                  completed_at: self.completed_at_ts.map(from_millis).transpose()?,
                  total: self.total.max(0) as u64,
                  processed: self.processed.max(0) as u64,
                  failed: self.failed.max(0) as u64 })
  }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::document_results)]
struct ResultRow {
  pub job_id: String,
  pub document_ref: String,
  pub status: String,
  pub payload: String,
  pub updated_at_ts: i64,
}

/// Store Diesel/SQLite que implementa `TemplateStore` y `ResultStore`.
///
/// Cada escritura corre en una transacción `IMMEDIATE`: el lock de
/// escritura se toma al empezar y los escritores concurrentes esperan
/// (`busy_timeout`) en lugar de fallar al promocionar el lock.
#[derive(Clone)]
pub struct DieselChainStore {
  pool: Arc<DbPool>,
}

impl DieselChainStore {
  pub fn new(database_url: &str) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(4)
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)
                              .map_err(|e| ChainError::Storage(format!("pool: {}", e)))?;
    let store = DieselChainStore { pool: Arc::new(pool) };
    let mut c = store.conn()?;
    c.run_pending_migrations(MIGRATIONS)
     .map_err(|e| ChainError::Storage(format!("migrations: {}", e)))?;
    log::info!("ocr-persistence: SQLite listo en {}", database_url);
    Ok(store)
  }

  fn conn(&self) -> Result<DbConn> {
    self.pool.get().map_err(|e| ChainError::Storage(format!("pool: {}", e)))
  }

  fn write<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut SqliteConnection) -> std::result::Result<T, TxError>
  {
    let mut conn = self.conn()?;
    conn.immediate_transaction(f).map_err(ChainError::from)
  }

  fn load_job(conn: &mut SqliteConnection, job_id: &Uuid) -> std::result::Result<Option<JobRow>, TxError> {
    Ok(jobs_dsl::jobs.find(job_id.to_string())
                     .select(JobRow::as_select())
                     .first::<JobRow>(conn)
                     .optional()?)
  }

  fn require_job(conn: &mut SqliteConnection, job_id: &Uuid) -> std::result::Result<JobRow, TxError> {
    Self::load_job(conn, job_id)?.ok_or_else(|| TxError::Chain(ChainError::NotFound(format!("job {}", job_id))))
  }

  fn job_exists(&self, job_id: &Uuid) -> Result<()> {
    let mut conn = self.conn()?;
    let found = jobs_dsl::jobs.find(job_id.to_string())
                              .select(jobs_dsl::id)
                              .first::<String>(&mut conn)
                              .optional()
                              .map_err(map_db_err)?;
    match found {
      Some(_) => Ok(()),
      None => Err(ChainError::NotFound(format!("job {}", job_id))),
    }
  }
}

impl TemplateStore for DieselChainStore {
  fn create_template(&self, mut template: ChainTemplate) -> Result<ChainTemplate> {
    validate_steps(&template.steps)?;
    template.steps = normalize_steps(template.steps);
    let row = TemplateRow::from_domain(&template)?;
    self.write(|c| {
          let exists = templates_dsl::templates.find(&row.id)
                                               .select(templates_dsl::id)
                                               .first::<String>(c)
                                               .optional()?;
          if exists.is_some() {
            return Err(TxError::Chain(ChainError::Conflict(format!("template {} already exists", row.id))));
          }
          diesel::insert_into(templates_dsl::templates).values(&row).execute(c)?;
          Ok(())
        })?;
    log::debug!("template {} '{}' guardada", template.id, template.name);
    Ok(template)
  }

  fn get_template(&self, id: &Uuid) -> Result<ChainTemplate> {
    let mut conn = self.conn()?;
    templates_dsl::templates.find(id.to_string())
                            .select(TemplateRow::as_select())
                            .first::<TemplateRow>(&mut conn)
                            .optional()
                            .map_err(map_db_err)?
                            .ok_or_else(|| ChainError::NotFound(format!("template {}", id)))?
                            .into_domain()
  }

  fn update_template(&self, id: &Uuid, steps: Vec<ChainStep>, expected_version: u32) -> Result<ChainTemplate> {
    validate_steps(&steps)?;
    self.write(|c| {
          let row = templates_dsl::templates.find(id.to_string())
                                            .select(TemplateRow::as_select())
                                            .first::<TemplateRow>(c)
                                            .optional()?
                                            .ok_or_else(|| ChainError::NotFound(format!("template {}", id)))?;
          let mut template = row.into_domain()?;
          if template.version != expected_version {
            return Err(TxError::Chain(ChainError::Conflict(format!("template {} is at version {}, expected {}",
                                                                   id, template.version, expected_version))));
          }
          template.steps = normalize_steps(steps);
          template.version += 1;
          template.updated_at = Utc::now();
          let updated = TemplateRow::from_domain(&template)?;
          diesel::update(templates_dsl::templates.find(id.to_string()))
            .set((templates_dsl::version.eq(updated.version),
                  templates_dsl::payload.eq(&updated.payload),
                  templates_dsl::updated_at_ts.eq(updated.updated_at_ts)))
            .execute(c)?;
          Ok(template)
        })
  }

  fn delete_template(&self, id: &Uuid) -> Result<()> {
    let deleted = self.write(|c| Ok(diesel::delete(templates_dsl::templates.find(id.to_string())).execute(c)?))?;
    if deleted == 0 {
      return Err(ChainError::NotFound(format!("template {}", id)));
    }
    Ok(())
  }

  fn list_templates(&self, owner: Option<&str>) -> Result<Vec<ChainTemplate>> {
    let mut conn = self.conn()?;
    let mut query = templates_dsl::templates.select(TemplateRow::as_select()).into_boxed();
    if let Some(o) = owner {
      query = query.filter(templates_dsl::owner.eq(o.to_string()));
    }
    let rows: Vec<TemplateRow> = query.order((templates_dsl::name.asc(), templates_dsl::id.asc()))
                    .load(&mut conn)
                    .map_err(map_db_err)?;
    rows.into_iter().map(TemplateRow::into_domain).collect()
  }
}

impl ResultStore for DieselChainStore {
  fn create_job(&self, job: &ChainJob) -> Result<()> {
    let row = JobRow::from_domain(job)?;
    self.write(|c| {
          if Self::load_job(c, &job.id)?.is_some() {
            return Err(TxError::Chain(ChainError::Conflict(format!("job {} already exists", job.id))));
          }
          diesel::insert_into(jobs_dsl::jobs).values(&row).execute(c)?;
          Ok(())
        })
  }

  fn get_job(&self, job_id: &Uuid) -> Result<ChainJob> {
    let mut conn = self.conn()?;
    jobs_dsl::jobs.find(job_id.to_string())
                  .select(JobRow::as_select())
                  .first::<JobRow>(&mut conn)
                  .optional()
                  .map_err(map_db_err)?
                  .ok_or_else(|| ChainError::NotFound(format!("job {}", job_id)))?
                  .into_domain()
  }

  fn list_jobs(&self) -> Result<Vec<ChainJob>> {
    let mut conn = self.conn()?;
    let rows: Vec<JobRow> = jobs_dsl::jobs.select(JobRow::as_select())
                             .order((jobs_dsl::created_at_ts.asc(), jobs_dsl::id.asc()))
                             .load(&mut conn)
                             .map_err(map_db_err)?;
    rows.into_iter().map(JobRow::into_domain).collect()
  }

  fn set_job_status(&self, job_id: &Uuid, status: JobStatus) -> Result<ChainJob> {
    let completed_at = if status.is_terminal() { Some(to_millis(Utc::now())) } else { None };
    let row = self.write(|c| {
                    Self::require_job(c, job_id)?;
                    diesel::update(jobs_dsl::jobs.find(job_id.to_string()))
                      .set((jobs_dsl::status.eq(status.as_str()), jobs_dsl::completed_at_ts.eq(completed_at)))
                      .execute(c)?;
                    Self::require_job(c, job_id)
                  })?;
    row.into_domain()
  }

  fn record_progress(&self, job_id: &Uuid, delta: ProgressDelta) -> Result<ChainJob> {
    let row = self.write(|c| {
                    let current = Self::require_job(c, job_id)?;
                    let total = current.total.max(0) as u64;
                    let processed = apply_delta(current.processed.max(0) as u64, delta.processed).min(total);
                    let failed = apply_delta(current.failed.max(0) as u64, delta.failed).min(processed);
                    diesel::update(jobs_dsl::jobs.find(job_id.to_string()))
                      .set((jobs_dsl::processed.eq(processed as i64), jobs_dsl::failed.eq(failed as i64)))
                      .execute(c)?;
                    Self::require_job(c, job_id)
                  })?;
    row.into_domain()
  }

  fn put_document_result(&self, job_id: &Uuid, document_ref: &str, result: &DocumentResult) -> Result<PutOutcome> {
    let row = ResultRow { job_id: job_id.to_string(),
                          document_ref: document_ref.to_string(),
                          status: result.status.as_str().to_string(),
                          payload: serde_json::to_string(result)?,
                          updated_at_ts: to_millis(Utc::now()) };
    self.write(|c| {
          Self::require_job(c, job_id)?;
          let previous = results_dsl::document_results.find((&row.job_id, &row.document_ref))
                                                      .select(results_dsl::status)
                                                      .first::<String>(c)
                                                      .optional()?;
          diesel::replace_into(results_dsl::document_results).values(&row).execute(c)?;
          match previous {
            None => Ok(PutOutcome::Inserted),
            Some(s) => {
              let previous = DocumentStatus::parse(&s).ok_or_else(|| {
                                                        ChainError::Storage(format!("unknown document status '{}'", s))
                                                      })?;
              Ok(PutOutcome::Replaced { previous })
            }
          }
        })
  }

  fn get_document_result(&self, job_id: &Uuid, document_ref: &str) -> Result<Option<DocumentResult>> {
    self.job_exists(job_id)?;
    let mut conn = self.conn()?;
    let payload = results_dsl::document_results.find((job_id.to_string(), document_ref.to_string()))
                                               .select(results_dsl::payload)
                                               .first::<String>(&mut conn)
                                               .optional()
                                               .map_err(map_db_err)?;
    match payload {
      Some(p) => Ok(Some(serde_json::from_str(&p)?)),
      None => Ok(None),
    }
  }

  fn list_document_results(&self, job_id: &Uuid) -> Result<Vec<DocumentResult>> {
    self.job_exists(job_id)?;
    let mut conn = self.conn()?;
    let rows: Vec<ResultRow> = results_dsl::document_results.filter(results_dsl::job_id.eq(job_id.to_string()))
                                            .select(ResultRow::as_select())
                                            .order(results_dsl::document_ref.asc())
                                            .load(&mut conn)
                                            .map_err(map_db_err)?;
    rows.into_iter()
        .map(|r| serde_json::from_str(&r.payload).map_err(ChainError::from))
        .collect()
  }
}

/// Construye el store a partir de `OCR_CHAIN_DB_URL` (o `DATABASE_URL`).
/// Sin ninguna de las dos usa `ocr_chain.db` en el directorio actual.
pub fn new_from_env() -> Result<DieselChainStore> {
  dotenvy::dotenv().ok();
  let url = std::env::var(ENV_DB_URL).or_else(|_| std::env::var("DATABASE_URL"))
                                     .unwrap_or_else(|_| DEFAULT_DB_URL.into());
  let lower = url.to_lowercase();
  if lower.starts_with("postgres") {
    return Err(ChainError::Storage(format!("ocr-persistence only supports SQLite, got '{}'", url)));
  }
  DieselChainStore::new(&url)
}

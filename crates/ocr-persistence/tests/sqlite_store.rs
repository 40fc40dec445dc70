use chain::{ChainError, ChainJob, ChainStep, ChainTemplate, DocumentRef, DocumentResult, DocumentStatus, InputSource,
            JobStatus, ProgressDelta, PutOutcome, ResultStore, StepKind, StepMetadata, StepOutcome, StepOutput,
            StepResult, TemplateStore};
use chrono::Utc;
use ocr_persistence::DieselChainStore;
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> DieselChainStore {
  let path = dir.path().join("chain.db");
  DieselChainStore::new(path.to_str().unwrap()).expect("open sqlite store")
}

fn template() -> ChainTemplate {
  ChainTemplate::new("invoices",
                     "alice",
                     vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                          ChainStep::new(2, "llm", InputSource::PreviousStep).with_prompt("fix")]).unwrap()
}

fn job_with(docs: usize) -> ChainJob {
  let set = (0..docs).map(|i| DocumentRef::new(format!("d{}.png", i), format!("/scans/d{}.png", i))).collect();
  ChainJob::new(template().snapshot(), set)
}

fn result(doc: &str, ok: bool) -> DocumentResult {
  let outcome = if ok {
    StepOutcome::Output(StepOutput { text: "text".into(), confidence: Some(0.7) })
  } else {
    StepOutcome::Error("provider failure: down".into())
  };
  let step = StepResult { step_number: 1,
                          provider: "ocr-a".into(),
                          input_source: InputSource::OriginalDocument,
                          prompt: None,
                          kind: StepKind::Recognition,
                          outcome,
                          metadata: StepMetadata { processing_time_ms: 3,
                                                   timestamp: Utc::now(),
                                                   input_length: 10,
                                                   output_length: 4 } };
  DocumentResult::from_steps(doc, vec![step], 3)
}

#[test]
fn template_crud_with_optimistic_versions() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir);
  let t = store.create_template(template()).unwrap();
  assert_eq!(store.get_template(&t.id).unwrap(), t);

  let steps = vec![ChainStep::new(1, "ocr-b", InputSource::OriginalDocument)];
  let updated = store.update_template(&t.id, steps.clone(), 1).unwrap();
  assert_eq!(updated.version, 2);
  match store.update_template(&t.id, steps, 1) {
    Err(ChainError::Conflict(_)) => {}
    other => panic!("expected conflict, got {:?}", other),
  }
  let bad = vec![ChainStep::new(1, "llm", InputSource::PreviousStep)];
  assert!(matches!(store.update_template(&t.id, bad, 2), Err(ChainError::Validation(_))));

  let other = ChainTemplate::new("receipts", "bob", vec![ChainStep::new(1, "x", InputSource::OriginalDocument)]).unwrap();
  store.create_template(other).unwrap();
  assert_eq!(store.list_templates(None).unwrap().len(), 2);
  assert_eq!(store.list_templates(Some("bob")).unwrap()[0].name, "receipts");

  store.delete_template(&t.id).unwrap();
  assert!(matches!(store.get_template(&t.id), Err(ChainError::NotFound(_))));
  assert!(matches!(store.delete_template(&t.id), Err(ChainError::NotFound(_))));
}

#[test]
fn job_roundtrip_and_status_transitions() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir);
  let job = job_with(3);
  store.create_job(&job).unwrap();
  assert!(matches!(store.create_job(&job), Err(ChainError::Conflict(_))));

  let loaded = store.get_job(&job.id).unwrap();
  assert_eq!(loaded.template_snapshot, job.template_snapshot);
  assert_eq!(loaded.document_set, job.document_set);
  assert_eq!(loaded.status, JobStatus::Queued);
  assert_eq!(loaded.total, 3);

  let processing = store.set_job_status(&job.id, JobStatus::Processing).unwrap();
  assert!(processing.completed_at.is_none());
  let done = store.set_job_status(&job.id, JobStatus::CompletedWithErrors).unwrap();
  assert!(done.completed_at.is_some());
  assert_eq!(store.list_jobs().unwrap().len(), 1);
}

#[test]
fn upsert_is_idempotent_and_counters_clamp() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir);
  let job = job_with(2);
  store.create_job(&job).unwrap();

  let first = store.put_document_result(&job.id, "d0.png", &result("d0.png", false)).unwrap();
  assert_eq!(first, PutOutcome::Inserted);
  store.record_progress(&job.id, ProgressDelta::for_put(first, DocumentStatus::Failed)).unwrap();

  let second = store.put_document_result(&job.id, "d0.png", &result("d0.png", true)).unwrap();
  assert_eq!(second, PutOutcome::Replaced { previous: DocumentStatus::Failed });
  let after = store.record_progress(&job.id, ProgressDelta::for_put(second, DocumentStatus::Success)).unwrap();
  assert_eq!((after.processed, after.failed), (1, 0));

  let results = store.list_document_results(&job.id).unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].status, DocumentStatus::Success);

  let clamped = store.record_progress(&job.id, ProgressDelta { processed: 10, failed: 10 }).unwrap();
  assert_eq!((clamped.processed, clamped.failed), (2, 2));
}

#[test]
fn results_for_unknown_job_are_rejected() {
  let dir = TempDir::new().unwrap();
  let store = open(&dir);
  let missing = uuid::Uuid::new_v4();
  assert!(matches!(store.put_document_result(&missing, "a", &result("a", true)), Err(ChainError::NotFound(_))));
  assert!(matches!(store.list_document_results(&missing), Err(ChainError::NotFound(_))));
  assert!(matches!(store.get_job(&missing), Err(ChainError::NotFound(_))));
}

#[test]
fn data_survives_reopening() {
  let dir = TempDir::new().unwrap();
  let job = job_with(1);
  {
    let store = open(&dir);
    store.create_job(&job).unwrap();
    store.put_document_result(&job.id, "d0.png", &result("d0.png", true)).unwrap();
  }
  let store = open(&dir);
  let got = store.get_document_result(&job.id, "d0.png").unwrap().unwrap();
  assert_eq!(got.document_ref, "d0.png");
  assert_eq!(got.status, DocumentStatus::Success);
  assert_eq!(got.steps[0].output().unwrap().confidence, Some(0.7));
  assert!(store.get_document_result(&job.id, "other.png").unwrap().is_none());
}

#[test]
fn concurrent_writers_on_distinct_documents() {
  let dir = TempDir::new().unwrap();
  let store = Arc::new(open(&dir));
  let job = job_with(16);
  store.create_job(&job).unwrap();

  let handles: Vec<_> = job.document_set
                           .iter()
                           .cloned()
                           .map(|doc| {
                             let store = store.clone();
                             let job_id = job.id;
                             std::thread::spawn(move || {
                               let r = result(&doc.name, true);
                               let outcome = store.put_document_result(&job_id, &doc.name, &r).unwrap();
                               store.record_progress(&job_id, ProgressDelta::for_put(outcome, r.status)).unwrap();
                             })
                           })
                           .collect();
  for h in handles {
    h.join().unwrap();
  }

  let job = store.get_job(&job.id).unwrap();
  assert_eq!((job.processed, job.failed), (16, 0));
  assert_eq!(store.list_document_results(&job.id).unwrap().len(), 16);
}

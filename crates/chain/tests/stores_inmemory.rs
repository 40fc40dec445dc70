use chain::{ChainError, ChainJob, ChainStep, ChainTemplate, DocumentRef, DocumentResult, DocumentStatus, InputSource,
            InMemoryResultStore, InMemoryTemplateStore, JobStatus, ProgressDelta, PutOutcome, ResultStore,
            StepKind, StepMetadata, StepOutcome, StepOutput, StepResult, TemplateStore, ValidationError};
use chrono::Utc;
use std::sync::Arc;
use std::thread;

fn two_step_template() -> ChainTemplate {
  ChainTemplate::new("invoice",
                     "alice",
                     vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                          ChainStep::new(2, "llm", InputSource::PreviousStep).with_prompt("clean up")]).unwrap()
}

fn result(doc: &str, text: &str) -> DocumentResult {
  let step = StepResult { step_number: 1,
                          provider: "ocr-a".into(),
                          input_source: InputSource::OriginalDocument,
                          prompt: None,
                          kind: StepKind::Recognition,
                          outcome: StepOutcome::Output(StepOutput { text: text.into(), confidence: Some(0.8) }),
                          metadata: StepMetadata { processing_time_ms: 2,
                                                   timestamp: Utc::now(),
                                                   input_length: 10,
                                                   output_length: text.chars().count() } };
  DocumentResult::from_steps(doc, vec![step], 2)
}

fn new_job(store: &InMemoryResultStore, docs: &[&str]) -> ChainJob {
  let refs = docs.iter().map(|d| DocumentRef::new(*d, format!("/scans/{}", d))).collect();
  let job = ChainJob::new(two_step_template().snapshot(), refs);
  store.create_job(&job).unwrap();
  job
}

#[test]
fn template_crud_bumps_version_and_detects_conflicts() {
  let store = InMemoryTemplateStore::new();
  let t = store.create_template(two_step_template()).unwrap();
  assert_eq!(t.version, 1);

  let steps = vec![ChainStep::new(1, "ocr-b", InputSource::OriginalDocument)];
  let updated = store.update_template(&t.id, steps.clone(), 1).unwrap();
  assert_eq!(updated.version, 2);
  assert_eq!(updated.steps[0].provider, "ocr-b");

  match store.update_template(&t.id, steps, 1) {
    Err(ChainError::Conflict(_)) => (),
    other => panic!("expected conflict, got {:?}", other),
  }

  store.delete_template(&t.id).unwrap();
  assert!(matches!(store.get_template(&t.id), Err(ChainError::NotFound(_))));
}

#[test]
fn template_store_rejects_invalid_steps() {
  let store = InMemoryTemplateStore::new();
  let t = store.create_template(two_step_template()).unwrap();
  let bad = vec![ChainStep::new(1, "a", InputSource::OriginalDocument),
                 ChainStep::new(3, "b", InputSource::PreviousStep)];
  match store.update_template(&t.id, bad, 1) {
    Err(ChainError::Validation(ValidationError::NonSequential { missing: 2 })) => (),
    other => panic!("expected validation error, got {:?}", other),
  }
  // la versión no cambia
  assert_eq!(store.get_template(&t.id).unwrap().version, 1);
}

#[test]
fn list_templates_filters_by_owner() {
  let store = InMemoryTemplateStore::new();
  store.create_template(two_step_template()).unwrap();
  let mut other = two_step_template();
  other.id = uuid::Uuid::new_v4();
  other.owner = "bob".into();
  store.create_template(other).unwrap();
  assert_eq!(store.list_templates(None).unwrap().len(), 2);
  assert_eq!(store.list_templates(Some("bob")).unwrap().len(), 1);
}

#[test]
fn put_document_result_is_an_idempotent_upsert() {
  let store = InMemoryResultStore::new();
  let job = new_job(&store, &["doc1.png"]);

  let first = store.put_document_result(&job.id, "doc1.png", &result("doc1.png", "first")).unwrap();
  assert_eq!(first, PutOutcome::Inserted);
  let second = store.put_document_result(&job.id, "doc1.png", &result("doc1.png", "second")).unwrap();
  assert_eq!(second, PutOutcome::Replaced { previous: DocumentStatus::Success });

  let all = store.list_document_results(&job.id).unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].final_output, "second");
}

#[test]
fn put_for_unknown_job_is_not_found() {
  let store = InMemoryResultStore::new();
  let err = store.put_document_result(&uuid::Uuid::new_v4(), "x", &result("x", "t")).unwrap_err();
  assert!(matches!(err, ChainError::NotFound(_)));
}

#[test]
fn concurrent_writers_on_distinct_documents() {
  let store = Arc::new(InMemoryResultStore::new());
  let names: Vec<String> = (0..32).map(|i| format!("doc{:02}.png", i)).collect();
  let name_refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
  let job = new_job(&store, &name_refs);

  let handles: Vec<_> = names.iter()
                             .cloned()
                             .map(|name| {
                               let store = store.clone();
                               let job_id = job.id;
                               thread::spawn(move || {
                                 let outcome = store.put_document_result(&job_id, &name, &result(&name, "ok")).unwrap();
                                 store.record_progress(&job_id, ProgressDelta::for_put(outcome, DocumentStatus::Success))
                                      .unwrap();
                               })
                             })
                             .collect();
  for h in handles {
    h.join().unwrap();
  }

  let job = store.get_job(&job.id).unwrap();
  assert_eq!(job.processed, 32);
  assert_eq!(job.failed, 0);
  assert_eq!(job.settled_status(), Some(JobStatus::Completed));
  let listed = store.list_document_results(&job.id).unwrap();
  assert_eq!(listed.len(), 32);
  assert_eq!(listed[0].document_ref, "doc00.png");
  assert_eq!(listed[31].document_ref, "doc31.png");
}

#[test]
fn terminal_status_sets_completed_at() {
  let store = InMemoryResultStore::new();
  let job = new_job(&store, &["a.png"]);
  let j = store.set_job_status(&job.id, JobStatus::Processing).unwrap();
  assert!(j.completed_at.is_none());
  let j = store.set_job_status(&job.id, JobStatus::Completed).unwrap();
  assert!(j.completed_at.is_some());
}

#[test]
fn racing_create_job_admits_exactly_one_writer() {
  let store = Arc::new(InMemoryResultStore::new());
  let refs = vec![DocumentRef::new("a.png", "/scans/a.png")];
  let job = ChainJob::new(two_step_template().snapshot(), refs);

  let handles: Vec<_> = (0..16).map(|_| {
                                 let store = store.clone();
                                 let job = job.clone();
                                 thread::spawn(move || store.create_job(&job))
                               })
                               .collect();
  let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
  assert!(outcomes.iter()
                  .filter_map(|r| r.as_ref().err())
                  .all(|e| matches!(e, ChainError::Conflict(_))));
  assert_eq!(store.list_jobs().unwrap().len(), 1);
}

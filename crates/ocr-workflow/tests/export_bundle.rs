use chain::{ChainStep, ChainTemplate, InMemoryResultStore, InMemoryTemplateStore, InputSource, JobStatus,
            ResultStore, TemplateStore, COMBINED_SEPARATOR};
use chrono::Utc;
use ocr_providers::stubs::{FailingProvider, StaticRecognizer};
use ocr_providers::CapabilityRegistry;
use ocr_workflow::export::{ERROR_MARKER, FULL_DETAIL_FILE, SUMMARY_FILE, TIMELINE_FILE};
use ocr_workflow::{build_coordinator, documents_from_paths, EngineConfig, ExportTransformer, WorkflowError};
use std::sync::Arc;
use tempfile::TempDir;

async fn finished_job() -> (TempDir, Arc<InMemoryResultStore>, uuid::Uuid) {
  let dir = TempDir::new().unwrap();
  let paths: Vec<_> = ["b.png", "a.png", "a.tif"].iter()
                                                .map(|n| {
                                                  let p = dir.path().join(n);
                                                  std::fs::write(&p, b"img").unwrap();
                                                  p
                                                })
                                                .collect();
  let registry = CapabilityRegistry::new().with_recognizer(Arc::new(StaticRecognizer::new("ocr-a", "hello", 0.9)))
                                          .with_recognizer(Arc::new(FailingProvider::new("broken", "down")));
  let templates = Arc::new(InMemoryTemplateStore::new());
  let results = Arc::new(InMemoryResultStore::new());
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "broken", InputSource::PreviousStep)];
  let t = templates.create_template(ChainTemplate::new("export", "alice", steps).unwrap()).unwrap();
  let coordinator = build_coordinator(templates, results.clone(), Arc::new(registry), &EngineConfig::default());
  let job_id = coordinator.launch(&t.id, documents_from_paths(&paths).unwrap()).await.unwrap();
  let job = coordinator.wait(&job_id).await.unwrap();
  assert_eq!(job.status, JobStatus::CompletedWithErrors);
  (dir, results, job_id)
}

#[tokio::test]
async fn export_produces_every_artifact() {
  let (_dir, results, job_id) = finished_job().await;
  let bundle = ExportTransformer::new(results).export(&job_id).unwrap();

  assert_eq!(bundle.full_detail.documents.len(), 3);
  assert!(bundle.full_detail.documents.iter().all(|d| d.steps.len() == 2));
  let names: Vec<_> = bundle.summary.iter().map(|r| r.filename.as_str()).collect();
  assert_eq!(names, vec!["a.png", "a.tif", "b.png"]);

  let csv = bundle.summary_csv();
  let mut lines = csv.lines();
  assert_eq!(lines.next(), Some("filename,status,final_output_length,total_time_ms,attempted_steps"));
  assert!(lines.next().unwrap().starts_with("a.png,partial,5,"));

  assert_eq!(bundle.timeline.lanes.len(), 2);
  assert_eq!(bundle.timeline.lanes[0].entries.len(), 3);
  assert!(bundle.timeline.lanes[1].entries.iter().all(|e| !e.success));

  assert_eq!(bundle.configuration.combined_separator, COMBINED_SEPARATOR);
  assert_eq!(bundle.configuration.totals.failed, 3);

  // stems colisionan para a.png / a.tif
  assert_eq!(bundle.text_files["text/final/a.png.txt"], "hello");
  assert_eq!(bundle.text_files["text/final/b.txt"], "hello");
  assert!(bundle.text_files["text/steps/2/b.txt"].starts_with(ERROR_MARKER));
  assert_eq!(bundle.text_files["text/steps/1/a.tif.txt"], "hello");
}

#[tokio::test]
async fn export_does_not_mutate_and_is_repeatable() {
  let (_dir, results, job_id) = finished_job().await;
  let before = results.list_document_results(&job_id).unwrap();
  let exporter = ExportTransformer::new(results.clone());
  let at = Utc::now();

  let first = exporter.export_at(&job_id, at).unwrap();
  let second = exporter.export_at(&job_id, at).unwrap();

  assert_eq!(first.files().unwrap(), second.files().unwrap());
  assert_eq!(results.list_document_results(&job_id).unwrap(), before);
  assert_eq!(results.get_job(&job_id).unwrap().status, JobStatus::CompletedWithErrors);
}

#[tokio::test]
async fn bundle_is_written_to_disk() {
  let (_dir, results, job_id) = finished_job().await;
  let bundle = ExportTransformer::new(results).export(&job_id).unwrap();
  let out = TempDir::new().unwrap();

  let root = bundle.write_to_dir(out.path()).unwrap();

  for file in [FULL_DETAIL_FILE, TIMELINE_FILE, SUMMARY_FILE] {
    assert!(root.join(file).is_file(), "{} missing", file);
  }
  let full: serde_json::Value =
    serde_json::from_slice(&std::fs::read(root.join(FULL_DETAIL_FILE)).unwrap()).unwrap();
  assert_eq!(full["documents"].as_array().unwrap().len(), 3);
  assert_eq!(std::fs::read_to_string(root.join("text").join("final").join("b.txt")).unwrap(), "hello");
}

#[test]
fn unfinished_or_unknown_job_cannot_be_exported() {
  let results = Arc::new(InMemoryResultStore::new());
  let template = ChainTemplate::new("t", "alice", vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument)]).unwrap();
  let job = chain::ChainJob::new(template.snapshot(), vec![chain::DocumentRef::new("a.png", "/x/a.png")]);
  results.create_job(&job).unwrap();
  let exporter = ExportTransformer::new(results.clone());

  let err = exporter.export(&job.id).unwrap_err();
  assert!(matches!(err, WorkflowError::JobNotCompleted { status: JobStatus::Queued, .. }));
  assert!(err.to_string().starts_with("job not completed"));

  results.set_job_status(&job.id, JobStatus::Cancelled).unwrap();
  assert!(exporter.export(&job.id).is_err());

  let err = exporter.export(&uuid::Uuid::new_v4()).unwrap_err();
  assert!(matches!(err, WorkflowError::JobNotFound(_)));
}

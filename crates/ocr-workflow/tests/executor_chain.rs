use chain::{ChainStep, ChainTemplate, DocumentRef, DocumentStatus, InputSource, StepKind, COMBINED_SEPARATOR};
use ocr_providers::stubs::{EchoTransformer, FailingProvider, SlowProvider, StaticRecognizer};
use ocr_providers::{CapabilityRegistry, UppercaseTransformer};
use ocr_workflow::ChainExecutor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn scan(dir: &TempDir, name: &str) -> DocumentRef {
  let path = dir.path().join(name);
  std::fs::write(&path, b"fake-image-bytes").unwrap();
  DocumentRef::from_path(&path).unwrap()
}

fn registry() -> Arc<CapabilityRegistry> {
  Arc::new(CapabilityRegistry::new().with_recognizer(Arc::new(StaticRecognizer::new("ocr-a", "hello", 0.9)))
                                    .with_recognizer(Arc::new(StaticRecognizer::new("ocr-b", "world", 0.8)))
                                    .with_recognizer(Arc::new(FailingProvider::new("broken", "engine crashed")))
                                    .with_recognizer(Arc::new(SlowProvider::new("slow", Duration::from_secs(5), "late")))
                                    .with_transformer(Arc::new(UppercaseTransformer::new("upper")))
                                    .with_transformer(Arc::new(EchoTransformer::new("llm"))))
}

fn executor() -> ChainExecutor {
  ChainExecutor::new(registry(), Duration::from_secs(5))
}

#[tokio::test]
async fn three_step_chain_combines_both_recognitions() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "ocr-b", InputSource::OriginalDocument),
                   ChainStep::new(3, "llm", InputSource::Combined).with_prompt("merge")];
  let template = ChainTemplate::new("three", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  assert_eq!(result.status, DocumentStatus::Success);
  assert_eq!(result.steps.len(), 3);
  let expected_input = format!("hello{}world", COMBINED_SEPARATOR);
  assert_eq!(result.final_output, format!("[merge] {}", expected_input));
  let step3 = result.step(3).unwrap();
  assert_eq!(step3.kind, StepKind::Transform);
  assert_eq!(step3.metadata.input_length, 5 + 5 + 7);
  assert_eq!(step3.prompt.as_deref(), Some("merge"));
  let step1 = result.step(1).unwrap();
  assert_eq!(step1.kind, StepKind::Recognition);
  assert_eq!(step1.metadata.input_length, "fake-image-bytes".len());
  assert_eq!(step1.output().unwrap().confidence, Some(0.9));
}

#[tokio::test]
async fn recognition_transform_and_merge_scenario() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "upper", InputSource::PreviousStep),
                   ChainStep::new(3, "llm", InputSource::Combined).with_prompt("merge")];
  let template = ChainTemplate::new("a-b-c", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  let s1 = result.step(1).unwrap().output_text().unwrap().to_string();
  let s2 = result.step(2).unwrap().output_text().unwrap().to_string();
  assert_eq!((s1.as_str(), s2.as_str()), ("hello", "HELLO"));
  let step3 = result.step(3).unwrap();
  assert_eq!(step3.metadata.input_length,
             s1.chars().count() + s2.chars().count() + COMBINED_SEPARATOR.chars().count());
  assert_eq!(result.final_output, step3.output_text().unwrap());
  assert_eq!(result.status, DocumentStatus::Success);
}

#[tokio::test]
async fn failed_middle_step_feeds_empty_input_forward() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "broken", InputSource::OriginalDocument),
                   ChainStep::new(3, "llm", InputSource::PreviousStep).with_prompt("fix")];
  let template = ChainTemplate::new("continue", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  assert_eq!(result.steps.len(), 3);
  assert!(result.step(2).unwrap().error().is_some());
  assert_eq!(result.step(3).unwrap().metadata.input_length, 0);
  assert_eq!(result.final_output, "[fix] ");
  assert_eq!(result.status, DocumentStatus::Partial);
}

#[tokio::test]
async fn failed_step_does_not_stop_the_chain() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "broken", InputSource::OriginalDocument),
                   ChainStep::new(3, "llm", InputSource::step_reference([1, 2]))];
  let template = ChainTemplate::new("partial", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  assert_eq!(result.status, DocumentStatus::Partial);
  assert_eq!(result.steps.len(), 3);
  assert!(result.step(2).unwrap().error().unwrap().contains("engine crashed"));
  // el paso fallido aporta texto vacío
  assert_eq!(result.final_output, "hello");
}

#[tokio::test]
async fn previous_step_after_failure_gets_empty_input() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "broken", InputSource::OriginalDocument),
                   ChainStep::new(2, "llm", InputSource::PreviousStep)];
  let template = ChainTemplate::new("empty-input", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  let step2 = result.step(2).unwrap();
  assert!(step2.is_success());
  assert_eq!(step2.metadata.input_length, 0);
  assert_eq!(result.final_output, "");
  assert_eq!(result.status, DocumentStatus::Failed);
}

#[tokio::test]
async fn missing_document_fails_preflight_without_calling_provider() {
  let dir = TempDir::new().unwrap();
  let doc = DocumentRef::new("ghost.png", dir.path().join("ghost.png"));
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "llm", InputSource::PreviousStep).with_prompt("fix")];
  let template = ChainTemplate::new("ghost", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  let err = result.step(1).unwrap().error().unwrap();
  assert!(err.contains("document not found or unreadable"), "{}", err);
  assert_eq!(result.step(1).unwrap().metadata.input_length, 0);
  assert_eq!(result.status, DocumentStatus::Partial);
}

#[tokio::test]
async fn unknown_provider_is_recorded_as_step_error() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "tesseract", InputSource::OriginalDocument)];
  let template = ChainTemplate::new("unknown", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  assert_eq!(result.status, DocumentStatus::Failed);
  assert_eq!(result.step(1).unwrap().error(), Some("provider 'tesseract' not found"));
}

#[tokio::test]
async fn slow_provider_times_out() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "slow", InputSource::OriginalDocument),
                   ChainStep::new(2, "ocr-a", InputSource::OriginalDocument)];
  let template = ChainTemplate::new("slow", "alice", steps).unwrap();
  let exec = ChainExecutor::new(registry(), Duration::from_millis(50));

  let result = exec.execute(&template.snapshot(), &doc).await;

  assert!(result.step(1).unwrap().error().unwrap().contains("timed out"));
  assert!(result.step(2).unwrap().is_success());
  assert_eq!(result.status, DocumentStatus::Partial);
}

#[tokio::test]
async fn disabled_steps_are_skipped_and_same_input_is_deterministic() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
                   ChainStep::new(2, "ocr-b", InputSource::OriginalDocument).disabled(),
                   ChainStep::new(3, "llm", InputSource::Combined)];
  let template = ChainTemplate::new("skip", "alice", steps).unwrap();
  let snapshot = template.snapshot();
  let exec = executor();

  let first = exec.execute(&snapshot, &doc).await;
  let second = exec.execute(&snapshot, &doc).await;

  assert!(first.step(2).is_none());
  assert_eq!(first.final_output, "hello");
  assert_eq!(first.final_output, second.final_output);
  assert_eq!(first.status, second.status);
}

#[tokio::test]
async fn snapshot_without_enabled_steps_fails_document() {
  let dir = TempDir::new().unwrap();
  let doc = scan(&dir, "doc1.png");
  let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument).disabled()];
  let template = ChainTemplate::new("none", "alice", steps).unwrap();

  let result = executor().execute(&template.snapshot(), &doc).await;

  assert!(result.steps.is_empty());
  assert_eq!(result.status, DocumentStatus::Failed);
}

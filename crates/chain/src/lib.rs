//! Crate `chain`: modelo de datos y contratos del motor de cadenas OCR
//!
//! Este crate define los tipos de dominio (`ChainTemplate`, `ChainStep`,
//! `ChainJob`, `DocumentResult`, `StepResult`), el validador estructural de
//! pasos, los contratos de persistencia (`TemplateStore`, `ResultStore`) y
//! implementaciones en memoria útiles para pruebas (`InMemoryTemplateStore`,
//! `InMemoryResultStore`).
//!
//! Diseño resumido:
//! - `step_number` es la única clave de orden: nunca se confía en la
//!   posición dentro de una lista.
//! - Un job se liga a un `TemplateSnapshot` congelado al lanzarse.
//! - Idempotencia: el resultado de un documento se guarda por
//!   `(job_id, document_ref)`; re-entregas reemplazan, no duplican.
//!
//! Ejemplo rápido:
//! ```rust
//! use chain::{ChainStep, ChainTemplate, InputSource};
//! let steps = vec![ChainStep::new(1, "ocr-a", InputSource::OriginalDocument),
//!                  ChainStep::new(2, "llm", InputSource::PreviousStep).with_prompt("fix typos")];
//! let template = ChainTemplate::new("demo", "alice", steps).unwrap();
//! assert_eq!(template.snapshot().step_count(), 2);
//! ```
pub mod domain;
pub mod errors;
pub mod repository;
pub mod stubs;
pub mod validation;

pub use domain::*;
pub use errors::*;
pub use repository::*;
pub use stubs::*;
pub use validation::*;

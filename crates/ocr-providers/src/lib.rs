//! ocr-providers: capacidades de reconocimiento y transformación de texto
//!
//! Los backends concretos son colaboradores externos; este crate sólo fija
//! sus interfaces (`TextRecognizer`, `TextTransformer`), el registro por
//! nombre (`CapabilityRegistry`) y algunos proveedores locales.
mod builtin;
mod capability;
mod errors;
mod registry;
pub mod stubs;

pub use builtin::{MergeLinesTransformer, SidecarTextRecognizer, UppercaseTransformer};
pub use capability::{Capability, ProviderInput, ProviderOutput, TextRecognizer, TextTransformer};
pub use errors::ProviderError;
pub use registry::{CapabilityRegistry, ProviderInfo, ResolvedProvider};

use std::sync::Arc;

/// Registro con los proveedores locales: `sidecar`, `uppercase` y
/// `merge-lines`.
pub fn builtin_registry() -> CapabilityRegistry {
  CapabilityRegistry::new().with_recognizer(Arc::new(SidecarTextRecognizer::new("sidecar")))
                           .with_transformer(Arc::new(UppercaseTransformer::new("uppercase")))
                           .with_transformer(Arc::new(MergeLinesTransformer::new("merge-lines")))
}

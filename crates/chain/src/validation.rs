// Archivo: validation.rs
// Propósito: validador estructural de pasos. Se ejecuta al guardar una
// plantilla y otra vez al lanzar un job.
use crate::domain::{ChainStep, InputSource};
use crate::errors::ValidationError;
use std::collections::BTreeSet;

/// Valida una lista de pasos candidata.
///
/// Reglas, en orden:
/// 1. la lista no está vacía;
/// 2. los `step_number` son exactamente `1..N` (sin ceros, duplicados ni huecos);
/// 3. el paso 1 usa `original_document` y ningún paso referencia un número
///    mayor o igual al suyo;
/// 4. `provider` no está vacío.
///
/// La existencia del proveedor no se comprueba aquí: es un asunto de
/// ejecución.
pub fn validate_steps(steps: &[ChainStep]) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut seen = BTreeSet::new();
    for s in steps {
        if s.step_number == 0 {
            return Err(ValidationError::InvalidStepNumber(0));
        }
        if !seen.insert(s.step_number) {
            return Err(ValidationError::DuplicateStep(s.step_number));
        }
    }
    let n = steps.len() as u32;
    if let Some(missing) = (1..=n).find(|k| !seen.contains(k)) {
        return Err(ValidationError::NonSequential { missing });
    }

    let mut ordered: Vec<&ChainStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.step_number);
    for s in ordered {
        validate_input_source(s)?;
        if s.provider.trim().is_empty() {
            return Err(ValidationError::EmptyProvider(s.step_number));
        }
    }
    Ok(())
}

fn validate_input_source(step: &ChainStep) -> Result<(), ValidationError> {
    if step.step_number == 1 && !step.input_source.is_original_document() {
        return Err(ValidationError::InvalidFirstStep { found: step.input_source.to_string() });
    }
    if let InputSource::StepReference { steps } = &step.input_source {
        if steps.is_empty() {
            return Err(ValidationError::EmptyReference(step.step_number));
        }
        if let Some(&bad) = steps.iter().find(|&&k| k >= step.step_number) {
            return Err(ValidationError::ForwardReference { step: step.step_number,
                                                           referenced: bad });
        }
    }
    Ok(())
}

//! Tipos de dominio de la cadena: plantillas, jobs y resultados.
pub mod job;
pub mod results;
pub mod template;

pub use job::*;
pub use results::*;
pub use template::*;

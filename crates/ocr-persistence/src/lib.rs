//! Persistencia SQLite (Diesel + r2d2) para el motor de cadenas OCR.
//! Expone el módulo `schema` y `DieselChainStore`, que implementa
//! `TemplateStore` y `ResultStore` del crate `chain`. Las migraciones se
//! embeben y se aplican al abrir el store.

mod chain_persistence;
pub mod schema;

pub use chain_persistence::{new_from_env, DieselChainStore, DEFAULT_DB_URL, ENV_DB_URL, MIGRATIONS};

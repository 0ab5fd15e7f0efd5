//! Durable, append-only trace record storage (spec §4.8, §6): SeaORM over
//! SQLite, matching the teacher's persistence stack, trimmed to the one
//! table this gateway actually needs.

pub mod db;
pub mod entities;
pub mod store;

pub use store::{SeaOrmTraceStore, StoreError};

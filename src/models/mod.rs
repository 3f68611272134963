//! Persisted rows for the resource catalog.
//!
//! These entities map to SQLite tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`. The catalog is owned exclusively by the
//! tracker service; nothing else writes these tables.

pub mod reference;
pub mod resource;

//! Core services: the storage abstraction, the resource reference tracker,
//! and the cleanup scheduler that ties them together.

pub mod cleanup;
pub mod storage;
pub mod tracker;

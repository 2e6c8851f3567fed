//! Adapter implementations
//!
//! Concrete integrations behind the port traits: SQLite and HTTP index
//! backends, the inference client, and the live broadcaster.

pub mod broadcast;
pub mod services;
pub mod storage;

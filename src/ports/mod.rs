//! Port traits the ingestion core depends on.
//!
//! Adapters are interchangeable behind these narrow contracts; the core
//! never imports an adapter directly.

pub mod broadcast;
pub mod index;
pub mod mocks;
pub mod search;
pub mod summarize;

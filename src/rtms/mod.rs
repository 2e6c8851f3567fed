//! RTMS ingestion core: per-stream sessions, media sub-sockets, jitter
//! fillers, the connection registry, and lifecycle event routing.

pub mod errors;
pub mod events;
pub mod filler;
pub mod media;
pub mod registry;
pub mod router;
pub mod session;

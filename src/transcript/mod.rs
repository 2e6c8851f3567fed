//! Transcript buffering and enrichment pipeline

pub mod buffer;
pub mod pipeline;

pub use buffer::{BufferSignal, SummarizeSignal, TranscriptBuffer};
pub use pipeline::TranscriptPipeline;

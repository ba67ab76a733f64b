#![allow(clippy::missing_docs_in_private_items)]

pub mod chunking;
pub mod orchestrator;
pub mod providers;
pub mod record_id;

pub use chunking::{Chunker, SemanticSplitter, Span};
pub use orchestrator::{run_accumulation_loop, run_monitor_loop, BatchOrchestrator, BatchTuning};
pub use providers::EmbeddingJobProvider;

pub mod sanitize;
pub mod inference;
pub mod codes;
pub mod prompts;
pub mod details;
pub mod run;
pub mod orchestrator; // summarize → diagnose → extract → resolve → persist

pub use orchestrator::{BatchOutcome, CodingPipeline, ModelOutcome, NoteOutcome, PipelineError};

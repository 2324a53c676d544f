pub mod chunking;
pub mod core;
pub mod error;
pub mod extract;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod search;
pub mod stages;
pub mod tools;

// --- Primary exports ---
pub use core::types;
pub use core::types::*;
pub use core::{AppState, Settings};
pub use error::PipelineError;

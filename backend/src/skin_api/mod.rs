pub mod client;
pub mod models;

pub use client::{SkinAnalysisClient, TaskClientError};
pub use models::{PollPolicy, SourceRef, Task, TaskResult, TaskStatus};

pub mod openai_assistants;
pub mod traits;
pub(crate) mod sse;
pub mod util;

// Re-exports for convenience.
pub use openai_assistants::OpenAiAssistants;
pub use traits::{AssistantBackend, RunRequest};

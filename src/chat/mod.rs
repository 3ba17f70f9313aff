pub mod engine;
pub mod keywords;
pub mod prompts;

pub use engine::{ChatEngine, ChatOptions, Persona};
pub use keywords::KeywordAnalysis;

pub mod tensorzero;

pub use tensorzero::{DealScore, LlmClient, LlmConfig, LlmError};

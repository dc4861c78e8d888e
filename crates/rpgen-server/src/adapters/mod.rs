//! Production collaborators: an OpenAI-compatible [`LlmSynthesizer`], a
//! shell-command [`CommandVerifier`] with its generated-test variant, and
//! an [`IntegrationCommand`] run after the build.

pub mod command;
pub mod llm;
pub mod testgen;

pub use command::{CommandVerifier, IntegrationCommand};
pub use llm::{LlmConfig, LlmSynthesizer};
pub use testgen::GeneratedTestVerifier;

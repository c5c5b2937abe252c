#[cfg(feature = "openai")]
pub mod client;
pub mod prompts;
pub mod types;

#[cfg(feature = "openai")]
pub use client::*;
pub use prompts::*;
pub use types::*;

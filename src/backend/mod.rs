// AI backend module.
// HTTP client and typed endpoints for the assistant's chat, hint, and feedback features.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::{AiClient, decode, interpret_response};
pub use endpoints::check_finish;
pub use types::*;

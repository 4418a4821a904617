//! Client for the Ollama HTTP API.
//!
//! [`OllamaClient`] and [`BlockingOllamaClient`] expose the same operations;
//! streamed calls return lazily decoded chunks. Tools built from typed callables
//! are sent with chat requests and the model's tool calls come back resolved but
//! not executed. Registry-directed calls are signed with the key in
//! `~/.ollama/id_ed25519`.

pub(crate) mod services;
pub mod signing;
pub mod tools;

pub use services::logging::{init_default_tracing, init_json_tracing};
pub use services::ollama::models::*;
pub use services::ollama::*;
pub use tools::*;

pub mod blocking;
pub mod client;
pub mod config;
pub mod models;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_server;

pub use blocking::{BlockingOllamaClient, ChunkIterator};
pub use client::OllamaClient;
pub use config::{parse_host, ClientBuilder, ClientConfig, DEFAULT_HOST, OLLAMA_HOST_ENV};
pub use stream::{decode_stream, ChunkIter, ChunkStream, NdjsonDecoder, StreamChunk};
pub use transport::{ApiRequest, Dispatch, Operation, PreparedRequest, Transport};

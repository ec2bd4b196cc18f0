//! API translation between the Ollama and Cerebras formats.
//!
//! The core of the proxy: converts requests, whole responses, and streaming
//! chunks between the two API formats. All translation functions are pure (no I/O).

pub mod ollama_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod timing;
pub mod upstream_types;

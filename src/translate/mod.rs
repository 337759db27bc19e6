//! Conversion between the `OpenAI` Chat Completions and Anthropic Messages formats.
//!
//! Inbound chat requests become Messages API requests; replies and streaming
//! events travel back the other way. Nothing in here performs I/O.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

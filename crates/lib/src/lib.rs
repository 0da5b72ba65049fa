//! Relay core library — chat channels in, completion backend, ordered chunked replies out.

pub mod channels;
pub mod chunker;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod pipeline;
pub mod secrets;

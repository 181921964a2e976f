//! Offline export of a causal language model into a deployable ONNX bundle:
//! one graph file, its SHA-256 sidecar and the tokenizer.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod display;
pub mod export;
pub mod hub;
pub mod logging;
pub mod pipeline;
pub mod quantize;
pub mod tokenizer;

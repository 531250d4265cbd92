//! Domain types for the scene generation pipeline.
//!
//! This crate has no internal dependencies. Every other crate in the
//! workspace builds on the types and traits defined here.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod generation;
pub mod project;
pub mod prompts;
pub mod retry;
pub mod stage;
pub mod store;
pub mod types;

//! skillforge - Create sandbox-compatible skills from a free-text requirement
//!
//! Ranks a catalog of existing skills, materializes the closest one, merges in
//! the requested features with an LLM (or deterministic templates when no
//! backend is configured), repairs forbidden environment dependencies with
//! batched, retried rewrites, then validates and packages the result as a
//! `.skill` archive.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod packager;
pub mod pipeline;
pub mod skill;
pub mod util;
pub mod validator;

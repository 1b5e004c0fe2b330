//! Core domain + application logic for the video merge bot.
//!
//! This crate is framework-agnostic. Telegram and ffmpeg live behind ports (traits)
//! implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod orchestrator;
pub mod registry;
pub mod scratch;
pub mod security;
pub mod session;

pub use errors::{Error, Result};

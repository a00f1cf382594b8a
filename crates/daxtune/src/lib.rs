#![forbid(unsafe_code)]

pub mod analysis;
pub mod cli;
pub mod config;
pub mod connection;
pub mod engine;
pub mod execution;
pub mod inline;
pub mod metadata;
pub mod models;
pub mod providers;
pub mod session;
pub mod utils;

pub use cli::app::{Cli, Command};
pub use engine::TuningEngine;

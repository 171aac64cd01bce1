//! Configuration module for the restreamd process supervisor
//!
//! Handles loading supervisor settings from TOML files and environment
//! variable overrides.

pub mod config;

pub use config::*;

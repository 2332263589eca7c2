//! Core types: errors, static configuration, runtime parameters.

pub mod config;
pub mod errors;
pub mod params;

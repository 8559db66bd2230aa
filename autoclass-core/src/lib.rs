//! # autoclass-core
//!
//! Foundation shared by the AutoClass crates: the validated fit
//! configuration with its layered loader, and atomic persistence helpers for
//! run artifacts.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    FitConfig, FitOverrides, FloatParam, IntParam, LrSchedule, SearchStrategy, load_config,
    save_config,
};
pub use error::ConfigError;

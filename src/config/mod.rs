//! Configuration management

pub mod registry;
pub mod settings;

pub use registry::*;
pub use settings::*;

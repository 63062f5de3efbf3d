// Main library module for the Tessera server
// The binary loads configuration, then hands every functional module to the module runtime

pub mod model; // Configuration and command line
pub mod modules; // Built-in module providers
pub mod startup; // Logging and shutdown utilities

pub use model::config::{Configuration, RunMode};
pub use modules::provider_catalog;

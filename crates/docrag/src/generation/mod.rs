//! Context handed to the downstream answer generator

pub mod prompt;

pub use prompt::ContextAssembler;

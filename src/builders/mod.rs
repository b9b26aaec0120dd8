//! Builders to assemble the runtime from configuration.

pub mod runtime_builder;

pub use runtime_builder::RuntimeBuilder;

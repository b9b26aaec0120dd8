//! Small cross-cutting helpers.

pub mod telemetry;

pub use telemetry::*;

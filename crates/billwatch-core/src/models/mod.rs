//! Data models for billwatch

mod billing;
mod metric;

pub use billing::*;
pub use metric::*;

pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod query;
pub mod stats;

pub use error::{IndexError, IndexResult};

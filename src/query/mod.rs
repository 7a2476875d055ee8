pub mod collocation;
pub mod context;

pub use collocation::*;
pub use context::*;

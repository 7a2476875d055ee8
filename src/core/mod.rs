pub mod row;
pub mod table;

pub use row::*;
pub use table::*;

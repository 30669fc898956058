mod store;
mod workspace;

pub use crate::store::*;
pub use crate::workspace::*;

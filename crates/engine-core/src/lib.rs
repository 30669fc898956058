mod channel;
mod engine;
mod history;
pub mod markup;
mod resolver;
mod schema;
mod tree;

pub use crate::channel::*;
pub use crate::engine::*;
pub use crate::history::*;
pub use crate::resolver::*;
pub use crate::schema::*;
pub use crate::tree::*;

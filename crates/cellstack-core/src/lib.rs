pub mod annotations;
pub mod config;
pub mod consts;
pub mod error;
pub mod io;
pub mod listener;
pub mod plane;
pub mod roi;
pub mod stack;
mod sync;

pub use error::{Result, StackError};
pub use stack::{ImageStack, MetaStack, Stack};

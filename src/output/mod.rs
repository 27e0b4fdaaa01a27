//! Output items, collection and dispatch.

pub mod collector;
pub mod dispatch;
pub mod item;

pub use collector::{resolve_database, OutputCollector};
pub use dispatch::{Dispatcher, Strategy};
pub use item::{Operation, OutputItem, OutputValue, ResolvedItem};

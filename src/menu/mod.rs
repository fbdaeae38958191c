//! Single-user terminal menu over in-memory storage.

pub mod commands;
pub mod storage;

pub use commands::{Menu, MenuChoice, MenuError};
pub use storage::{InMemoryStorage, MenuTask};

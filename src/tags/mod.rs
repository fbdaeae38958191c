//! Tags: per-owner labels and their many-to-many link to tasks.

pub mod model;
pub mod routes;

pub use model::{Tag, TagName, TagPage};

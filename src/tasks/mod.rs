//! Tasks: the primary entity, its listing query, and its HTTP routes.

pub mod model;
pub mod query;
pub mod routes;

pub use model::{NewTask, Priority, Task, TaskPatch};
pub use query::{Pagination, SortKey, SortOrder, TaskFilter, TaskPage, TaskQuery};

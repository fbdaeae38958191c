//! TaskFlow: multi-user task tracking over HTTP, plus a single-user terminal menu.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod menu;
pub mod rate_limit;
pub mod store;
pub mod tags;
pub mod tasks;

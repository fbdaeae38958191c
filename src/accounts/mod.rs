//! Accounts: registration, sign-in and sign-out.

pub mod model;
pub mod password;
pub mod routes;

pub use model::{Email, NewUser, User};

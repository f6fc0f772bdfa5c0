//! Wire and domain types shared by the database layer, the REST handlers
//! and the server binary.

pub mod api;
pub mod models;

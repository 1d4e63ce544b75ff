//! Wire types shared by the capsule server and its clients.

pub mod api;
pub mod models;

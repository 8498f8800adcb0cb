//! Application services layer.

pub mod error;
pub mod maintenance;
pub mod repos;

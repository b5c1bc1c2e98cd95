//! Shared building blocks of the SQL data-source manager: configuration,
//! error taxonomy and data models.

pub mod config;
pub mod errors;
pub mod models;
pub mod utils;

//! Retrieval surface: staged file downloads and health probes

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;

pub use error::ApiError;
pub use server::{router, run};

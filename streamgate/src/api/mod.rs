//! HTTP service surface.

pub mod models;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};

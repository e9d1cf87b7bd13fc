pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod groups;
pub mod handlers;
pub mod identity;
pub mod messages;
pub mod middleware;
pub mod store;
pub mod workflow;

pub use app::{router, AppState};

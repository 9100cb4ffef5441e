pub mod app;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod websocket;
pub mod ws;

pub use app::{build_router, serve, AppState};
pub use config::Config;

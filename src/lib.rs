pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod websocket;

// proxy module - HTTP front-end for the conversational backend

pub mod config;
pub mod error;
pub mod resume_token;
pub mod server;
pub mod session_manager;

pub mod common;            // Shared helpers (query flags)
pub mod handlers;          // API endpoint handlers
pub mod middleware;        // Axum middleware (bearer auth)
pub mod upstream;          // Backend collaborator

pub use config::GatewayConfig;
pub use error::ApiError;
pub use server::{AppState, AxumServer};
pub use session_manager::SessionManager;

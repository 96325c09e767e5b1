pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod form;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod service;

pub use config::AppConfig;
pub use error::{DocGenError, Result};
pub use service::{AppState, build_router, create_app};
pub use models::*;

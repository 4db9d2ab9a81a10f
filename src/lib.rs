pub mod api;
pub mod chatbot;
pub mod config;
pub mod genai;
pub mod geometry;
pub mod middlewares;
pub mod queries;
pub mod simulator;
pub mod store;

pub use config::AppConfig;
pub use store::{DataStore, MemoryStore};

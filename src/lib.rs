pub mod auth;
pub mod client;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod otp;
pub mod run;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;

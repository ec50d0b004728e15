pub mod backend;
pub mod config;
pub mod error;
pub mod providers;
pub mod server;
pub mod translate;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use server::{build_router, AppState};

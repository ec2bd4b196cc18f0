pub mod catalog;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{ErrorKind, ProxyError, Result};
pub use server::{build_router, AppState};
pub use upstream::UpstreamClient;

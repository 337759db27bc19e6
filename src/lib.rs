pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod router;
pub mod server;
pub mod translate;

pub use config::RouterConfig;
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use router::ModelMapper;
pub use server::{build_router, AppState};

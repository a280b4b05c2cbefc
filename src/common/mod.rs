pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use error::{FaceAuthError, Result};
pub use logging::init_logging;
pub use paths::Paths;

pub mod config;
pub mod error;

pub use config::{load_dotenv, Config, SchedulerConfig, StorageConfig};
pub use error::*;

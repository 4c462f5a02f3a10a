//! Fleet description: nodes, shared resources and jobs, loaded from TOML.

mod loading;
mod types;
mod validation;


pub use types::{FleetConfig, JobConfig, NodeConfig, ResourceConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Invalid config value for {key}: {value}")]
    InvalidConfig { key: String, value: String },
}

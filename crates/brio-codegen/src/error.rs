use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Unsupported default argument expression at {location}: {reason}")]
    UnsupportedDefault { location: String, reason: String },
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Program is not compilable: {0}")]
    NotCompilable(String),

    #[error("Invalid program structure: {0}")]
    InvalidProgram(String),
}

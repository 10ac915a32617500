use crate::external::MappedDiagnostic;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Program is not compilable: {0}")]
    NotCompilable(#[from] brio_core::CoreError),

    #[error("Code generation failed: {0}")]
    Codegen(#[from] brio_codegen::CodegenError),

    #[error("External compilation failed with {} diagnostic(s)", .0.len())]
    Diagnostics(Vec<MappedDiagnostic>),

    #[error("Timed out after {waited:?} waiting for a function compiled elsewhere")]
    LazyWaitTimeout { waited: Duration },

    #[error("Timed out after {waited:?} waiting for a concurrent compilation of the same script")]
    CompileContention { waited: Duration },

    #[error("Artifact for {0} is not in a loadable state")]
    NotLoadable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

//! Compilation driver for the Brio compile backend.
//!
//! Sits between a parsed [`brio_core::Program`] and the runtime: it drives
//! generation through `brio-codegen`, hands the generated source to an
//! [`external::ExternalCompiler`], persists an [`artifact::ArtifactManifest`]
//! for cross-process reuse, and caches results per script path with
//! modification-driven invalidation.

pub mod artifact;
pub mod cache;
pub mod class_name;
pub mod driver;
pub mod error;
pub mod external;
pub mod lazy;

pub use artifact::{ArtifactManifest, CompilationArtifact, DependencyStamp};
pub use cache::CompileState;
pub use class_name::{class_file_path, class_name_for};
pub use driver::{CompileDriver, DriverOptions};
pub use error::DriverError;
pub use external::{CommandCompiler, CompilerDiagnostic, ExternalCompiler, MappedDiagnostic};
pub use lazy::FunctionDirectory;

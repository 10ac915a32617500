//! Program model and runtime collaborator interfaces for the Brio compile backend

pub mod error;
pub mod line_map;
pub mod location;
pub mod program;
pub mod registry;

pub use error::CoreError;
pub use line_map::LineMap;
pub use location::SourceLocation;
pub use program::{Expr, ExprFactory, ExprKind, Literal, NodeId, Program, Stmt};
pub use registry::{InMemoryRegistry, RuntimeRegistry};

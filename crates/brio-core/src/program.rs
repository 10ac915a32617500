//! The parsed-program tree consumed by the compile backend.
//!
//! The parser itself lives outside this workspace; these types are the
//! contract it produces. The backend consumes the tree read-only: analysis
//! walks it, the emitter turns it into generated source, and nothing here is
//! mutated after parsing.
//!
//! Every expression carries a [`NodeId`] assigned by the [`ExprFactory`] that
//! built it. Expression identity (not structural equality) is what the
//! emitter's dedup tables key on: two textually identical sub-expressions may
//! have distinct evaluation order and must never be merged.

use crate::error::CoreError;
use crate::location::SourceLocation;
use std::path::PathBuf;

/// Identity of one expression node within a program.
///
/// Ids are unique per [`ExprFactory`], which in practice means per parsed
/// program. They are never meaningful across programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn index(self) -> u64 {
        self.0
    }
}

/// Allocates [`NodeId`]s for one program's expressions.
///
/// Owned by the parser while it builds a tree; kept per-program so that
/// concurrent parses stay deterministic and independent.
#[derive(Debug, Default)]
pub struct ExprFactory {
    next: u64,
}

impl ExprFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expr(&mut self, kind: ExprKind, location: SourceLocation) -> Expr {
        let id = NodeId(self.next);
        self.next += 1;
        Expr { id, kind, location }
    }
}

/// One parsed compilation unit: a script file's tree.
#[derive(Debug, Clone)]
pub struct Program {
    /// Path of the script this program was parsed from.
    pub source_path: PathBuf,
    /// The top-level statement. Must be a block for the program to be
    /// compilable; the driver rejects anything else before analysis.
    pub top: Stmt,
    /// Functions declared at the top level.
    pub functions: Vec<FunctionDecl>,
    /// Classes declared at the top level.
    pub classes: Vec<ClassDecl>,
}

impl Program {
    /// Check that the top-level statement is of a compilable kind.
    ///
    /// A program that fails this check is rejected outright; no partial
    /// artifact is ever produced for it.
    pub fn ensure_compilable(&self) -> Result<(), CoreError> {
        match &self.top {
            Stmt::Block { .. } => Ok(()),
            other => Err(CoreError::NotCompilable(format!(
                "top-level statement at {} is {}, expected a block",
                other.location(),
                other.kind_name(),
            ))),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A declared function or method.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub location: SourceLocation,
}

/// One formal parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Default value expression, evaluated when a call site omits the
    /// argument.
    pub default: Option<Expr>,
}

/// A declared class: methods plus class constants.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub methods: Vec<FunctionDecl>,
    pub constants: Vec<(String, Expr)>,
    pub location: SourceLocation,
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
        location: SourceLocation,
    },
    Expr {
        expr: Expr,
        location: SourceLocation,
    },
    /// `x = value`
    Assign {
        target: String,
        value: Expr,
        location: SourceLocation,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        location: SourceLocation,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        location: SourceLocation,
    },
    Break {
        location: SourceLocation,
    },
    Continue {
        location: SourceLocation,
    },
    Return {
        value: Option<Expr>,
        location: SourceLocation,
    },
    Echo {
        expr: Expr,
        location: SourceLocation,
    },
    /// `try { body } catch (var) { catch_body }`
    Try {
        body: Vec<Stmt>,
        catch_var: String,
        catch_body: Vec<Stmt>,
        location: SourceLocation,
    },
    /// Dynamic inclusion of another script; opaque to analysis.
    Include {
        target: Expr,
        location: SourceLocation,
    },
}

impl Stmt {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Stmt::Block { location, .. }
            | Stmt::Expr { location, .. }
            | Stmt::Assign { location, .. }
            | Stmt::If { location, .. }
            | Stmt::While { location, .. }
            | Stmt::Break { location }
            | Stmt::Continue { location }
            | Stmt::Return { location, .. }
            | Stmt::Echo { location, .. }
            | Stmt::Try { location, .. }
            | Stmt::Include { location, .. } => location,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Stmt::Block { .. } => "block",
            Stmt::Expr { .. } => "expression",
            Stmt::Assign { .. } => "assignment",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::Break { .. } => "break",
            Stmt::Continue { .. } => "continue",
            Stmt::Return { .. } => "return",
            Stmt::Echo { .. } => "echo",
            Stmt::Try { .. } => "try",
            Stmt::Include { .. } => "include",
        }
    }
}

/// An expression node with its identity and position.
#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    /// Read of a script variable.
    Var(String),
    /// Reference to a named constant, resolved by id at artifact init.
    ConstRef(String),
    /// Call of a declared or builtin function, dispatched by numeric id.
    Call { name: String, args: Vec<Expr> },
    /// Instantiation of a class, dispatched by numeric id.
    New { class: String, args: Vec<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// A pattern literal; a fresh matcher object is instantiated from the
    /// pattern source at artifact init.
    Regex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Name of the runtime value operation the generated code calls.
    pub fn runtime_method(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Concat => "concat",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn runtime_method(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("test.brio", line)
    }

    #[test]
    fn test_expr_factory_ids_are_unique() {
        let mut factory = ExprFactory::new();
        let a = factory.expr(ExprKind::Literal(Literal::Int(1)), loc(1));
        let b = factory.expr(ExprKind::Literal(Literal::Int(1)), loc(1));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_ensure_compilable() {
        let program = Program {
            source_path: "test.brio".into(),
            top: Stmt::Block {
                body: vec![],
                location: loc(1),
            },
            functions: vec![],
            classes: vec![],
        };
        assert!(program.ensure_compilable().is_ok());

        let rejected = Program {
            source_path: "test.brio".into(),
            top: Stmt::Break { location: loc(1) },
            functions: vec![],
            classes: vec![],
        };
        let err = rejected.ensure_compilable().unwrap_err();
        assert!(err.to_string().contains("break"));
    }
}

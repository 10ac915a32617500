//! Turns an analyzed program into one generated source unit.
//!
//! A unit is a Rust source file declaring one class struct per program: an
//! `execute` entry routine for the top-level code, one routine per declared
//! function and method, an `import_definitions` routine installing the
//! unit's functions and classes at their numeric ids, an `init` routine
//! resolving names against the runtime registry exactly once, and an
//! `is_modified` delegate checking recorded dependency timestamps. The
//! trailing coda (struct declaration, constructor, `init`) is emitted once,
//! after all per-statement codegen, from the symbol table's entries.

use crate::analysis::{analyze_function, analyze_top, FunctionAnalysis};
use crate::error::CodegenError;
use crate::symbols::{SymbolKind, SymbolTable};
use crate::writer::{escape_str, UnitWriter};
use brio_core::line_map::LineMap;
use brio_core::program::{Expr, ExprKind, FunctionDecl, Literal, Program, Stmt, UnaryOp};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Functions with more formals than this take a packed argument slice
/// instead of a fixed signature.
const MAX_FIXED_ARGS: usize = 5;

/// Driver-supplied knobs for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Also emit an instrumented sibling unit under a derived class name.
    pub profile: bool,
    /// Keep function and class name case when resolving runtime ids.
    pub case_sensitive: bool,
    /// Functions other programs have registered with the runtime; calls to
    /// these dispatch by id, anything else falls back to by-name dispatch.
    pub runtime_functions: Vec<String>,
    /// Recorded (path, mtime in milliseconds) stamps baked into the
    /// generated `is_modified` check.
    pub dependencies: Vec<(String, u64)>,
}

/// One generated source unit, ready to be persisted and handed to the
/// external compiler.
#[derive(Debug, Clone)]
pub struct GeneratedUnit {
    pub class_name: String,
    pub source: String,
    pub line_map: LineMap,
}

/// Generate the unit(s) for one program: the primary unit, plus the profile
/// sibling when requested. Both siblings share one analysis result.
pub fn generate(
    program: &Program,
    class_name: &str,
    options: &GenerateOptions,
) -> Result<Vec<GeneratedUnit>, CodegenError> {
    let analyses = Analyses::run(program);
    debug!(
        class_name,
        functions = program.functions.len(),
        classes = program.classes.len(),
        "generating unit"
    );

    let mut units = Vec::new();
    units.push(UnitGenerator::new(program, class_name, options, &analyses, false).generate()?);
    if options.profile {
        let profile_name = format!("{}_prof", class_name);
        units.push(
            UnitGenerator::new(program, &profile_name, options, &analyses, true).generate()?,
        );
    }
    Ok(units)
}

/// Analysis results for a whole program, shared across sibling units.
struct Analyses {
    top: FunctionAnalysis,
    functions: HashMap<String, FunctionAnalysis>,
}

impl Analyses {
    fn run(program: &Program) -> Self {
        let mut functions = HashMap::new();
        for func in &program.functions {
            functions.insert(func.name.clone(), analyze_function(func));
        }
        for class in &program.classes {
            for method in &class.methods {
                functions.insert(
                    format!("{}::{}", class.name, method.name),
                    analyze_function(method),
                );
            }
        }
        Self {
            top: analyze_top(program),
            functions,
        }
    }
}

/// Generator for a single unit.
pub struct UnitGenerator<'a> {
    program: &'a Program,
    class_name: String,
    options: &'a GenerateOptions,
    analyses: &'a Analyses,
    profile: bool,
    symbols: SymbolTable,
    /// Mangled names of functions declared in this program.
    local_functions: HashSet<String>,
    /// Mangled names the runtime already knows from other programs.
    runtime_functions: HashSet<String>,
    try_counter: u32,
}

impl<'a> UnitGenerator<'a> {
    fn new(
        program: &'a Program,
        class_name: &str,
        options: &'a GenerateOptions,
        analyses: &'a Analyses,
        profile: bool,
    ) -> Self {
        let symbols = SymbolTable::new(options.case_sensitive);
        let local_functions = program
            .functions
            .iter()
            .map(|f| symbols.mangle(&f.name))
            .collect();
        let runtime_functions = options
            .runtime_functions
            .iter()
            .map(|f| symbols.mangle(f))
            .collect();
        Self {
            program,
            class_name: class_name.to_string(),
            options,
            analyses,
            profile,
            symbols,
            local_functions,
            runtime_functions,
            try_counter: 0,
        }
    }

    fn generate(mut self) -> Result<GeneratedUnit, CodegenError> {
        let program = self.program;
        let analyses = self.analyses;
        let mut w = UnitWriter::new();

        w.println("// Generated by brio-codegen; do not edit.");
        w.println(&format!("// source: {}", program.source_path.display()));
        w.blank();
        w.println("use brio_rt::{DefinitionTable, Env, FunctionHandle, ClassHandle, ModuleRef, Pattern, Value};");
        w.blank();

        w.println(&format!("impl {} {{", self.class_name));
        w.push_depth();

        self.generate_execute(&mut w)?;
        for func in &program.functions {
            let analysis = &analyses.functions[&func.name];
            self.generate_function(&mut w, func, &func.name, analysis)?;
        }
        for class in &program.classes {
            for method in &class.methods {
                let key = format!("{}::{}", class.name, method.name);
                let analysis = &analyses.functions[&key];
                self.generate_function(&mut w, method, &key, analysis)?;
            }
        }
        self.generate_import_definitions(&mut w)?;
        self.generate_is_modified(&mut w);

        w.pop_depth();
        w.println("}");

        self.generate_coda(&mut w);

        let (source, line_map) = w.finish();
        Ok(GeneratedUnit {
            class_name: self.class_name,
            source,
            line_map,
        })
    }

    /// The entry routine running the program's top-level code.
    fn generate_execute(&mut self, w: &mut UnitWriter) -> Result<(), CodegenError> {
        let program = self.program;
        let analyses = self.analyses;
        w.println("pub fn execute(&self, env: &mut Env) -> Value {");
        w.push_depth();
        w.println("env.check_timeout();");
        if self.profile {
            w.println("env.profile_hit(\"__top__\");");
        }
        self.declare_locals(w, &analyses.top);

        let body = match &program.top {
            Stmt::Block { body, .. } => body.as_slice(),
            other => std::slice::from_ref(other),
        };
        self.stmts(w, body)?;
        if falls_through(body) {
            w.println("Value::null()");
        }
        w.pop_depth();
        w.println("}");
        w.blank();
        Ok(())
    }

    fn generate_function(
        &mut self,
        w: &mut UnitWriter,
        func: &FunctionDecl,
        key: &str,
        analysis: &FunctionAnalysis,
    ) -> Result<(), CodegenError> {
        let compile_name = self.compilation_name(key);
        let variable_args = func.params.len() > MAX_FIXED_ARGS;

        w.set_location(&func.location);
        if variable_args {
            w.println(&format!(
                "fn fun_{}(&self, env: &mut Env, args: &[Value]) -> Value {{",
                compile_name
            ));
        } else {
            let params: Vec<String> = func
                .params
                .iter()
                .map(|p| format!("mut {}: Value", var_ident(&p.name)))
                .collect();
            w.println(&format!(
                "fn fun_{}(&self, env: &mut Env{}{}) -> Value {{",
                compile_name,
                if params.is_empty() { "" } else { ", " },
                params.join(", ")
            ));
        }
        w.push_depth();
        w.println("env.check_timeout();");
        if self.profile {
            w.println(&format!(
                "env.profile_hit(\"{}\");",
                escape_str(&self.symbols.mangle(&func.name))
            ));
        }

        if variable_args {
            let defaults = self.default_array(func)?;
            for (i, param) in func.params.iter().enumerate() {
                w.println(&format!(
                    "let mut {} = if args.len() > {} {{ args[{}].clone() }} else {{ self.{}[{}].clone() }};",
                    var_ident(&param.name),
                    i,
                    i,
                    defaults,
                    i
                ));
            }
        }
        self.declare_locals(w, analysis);

        self.stmts(w, &func.body)?;
        if falls_through(&func.body) {
            // The body can complete without an explicit return.
            w.println("Value::null()");
        }
        w.pop_depth();
        w.println("}");
        w.blank();
        Ok(())
    }

    /// Declarations for the routine's non-parameter variables. A variable
    /// the analysis could not prove definitely assigned before every read
    /// starts at the default value; the rest are bare declarations the
    /// routine assigns before use.
    fn declare_locals(&self, w: &mut UnitWriter, analysis: &FunctionAnalysis) {
        for (name, summary) in analysis.vars() {
            if summary.param_index.is_some() {
                continue;
            }
            if summary.needs_default_init {
                w.println(&format!("let mut {} = Value::null();", var_ident(name)));
            } else {
                w.println(&format!("let mut {};", var_ident(name)));
            }
        }
    }

    fn generate_import_definitions(&mut self, w: &mut UnitWriter) -> Result<(), CodegenError> {
        let program = self.program;
        w.println("pub fn import_definitions(&self, table: &mut DefinitionTable) {");
        w.push_depth();
        for func in &program.functions {
            let fid = self.symbols.add_function_id(&func.name);
            let runtime_name = self.symbols.mangle(&func.name);
            let compile_name = self.compilation_name(&func.name);
            let mut handle = format!(
                "FunctionHandle::new(\"{}\", \"fun_{}\")",
                escape_str(&runtime_name),
                compile_name
            );
            if func.params.iter().any(|p| p.default.is_some()) {
                let defaults = self.default_array(func)?;
                handle.push_str(&format!(".with_defaults(&self.{})", defaults));
            }
            w.println(&format!("table.set_function(self.{}, {});", fid, handle));
        }
        for class in &program.classes {
            let cid = self.symbols.add_class_id(&class.name);
            let runtime_name = self.symbols.mangle(&class.name);
            let methods: Vec<String> = class
                .methods
                .iter()
                .map(|m| {
                    format!(
                        "(\"{}\", \"fun_{}\")",
                        escape_str(&self.symbols.mangle(&m.name)),
                        self.compilation_name(&format!("{}::{}", class.name, m.name))
                    )
                })
                .collect();
            let mut handle = format!(
                "ClassHandle::new(\"{}\", &[{}])",
                escape_str(&runtime_name),
                methods.join(", ")
            );
            for (const_name, expr) in &class.constants {
                let source = self.render_const_expr(expr)?;
                let field = self.symbols.add_expr(expr.id, &source);
                handle.push_str(&format!(
                    ".with_constant(\"{}\", &self.{})",
                    escape_str(const_name),
                    field
                ));
            }
            w.println(&format!("table.set_class(self.{}, {});", cid, handle));
        }
        w.pop_depth();
        w.println("}");
        w.blank();
        Ok(())
    }

    /// The artifact's own modification check against the dependency stamps
    /// recorded at generation time.
    fn generate_is_modified(&mut self, w: &mut UnitWriter) {
        w.println("pub fn is_modified(&self, env: &Env) -> bool {");
        w.push_depth();
        if self.options.dependencies.is_empty() {
            w.println("false");
        } else {
            for (i, (path, mtime)) in self.options.dependencies.iter().enumerate() {
                let op = if i == 0 { "" } else { "    || " };
                w.println(&format!(
                    "{}env.source_modified(\"{}\", {})",
                    op,
                    escape_str(path),
                    mtime
                ));
            }
        }
        w.pop_depth();
        w.println("}");
    }

    /// The coda: one struct field per registered entry, a constructor for
    /// the literal-backed entries, and one `init` statement per id-bearing
    /// entry resolving it against the runtime exactly once.
    fn generate_coda(&mut self, w: &mut UnitWriter) {
        w.blank();
        w.println("// ---- constant pool ----");
        w.blank();
        w.println(&format!("pub struct {} {{", self.class_name));
        w.push_depth();
        for entry in self.symbols.entries() {
            let ty = match &entry.kind {
                SymbolKind::StringValue { .. }
                | SymbolKind::CharArray { .. }
                | SymbolKind::ConstExpr { .. } => "Value",
                SymbolKind::ConstExprArray { .. } => "Vec<Value>",
                SymbolKind::Module { .. } => "ModuleRef",
                SymbolKind::Regex { .. } => "Pattern",
                SymbolKind::FunctionId { .. }
                | SymbolKind::ClassId { .. }
                | SymbolKind::ConstantId { .. } => "u32",
            };
            w.println(&format!("{}: {},", entry.name, ty));
        }
        w.pop_depth();
        w.println("}");
        w.blank();

        w.println(&format!("impl {} {{", self.class_name));
        w.push_depth();
        w.println("pub fn new() -> Self {");
        w.push_depth();
        w.println("Self {");
        w.push_depth();
        for entry in self.symbols.entries() {
            let value = match &entry.kind {
                SymbolKind::StringValue { value } => {
                    format!("Value::str(\"{}\")", escape_str(value))
                }
                SymbolKind::CharArray { value } => {
                    format!("Value::chars(\"{}\")", escape_str(value))
                }
                SymbolKind::ConstExpr { source } => source.clone(),
                SymbolKind::ConstExprArray { sources } => {
                    format!("vec![{}]", sources.join(", "))
                }
                SymbolKind::Module { .. } => "ModuleRef::unresolved()".to_string(),
                SymbolKind::Regex { .. } => "Pattern::unresolved()".to_string(),
                SymbolKind::FunctionId { .. }
                | SymbolKind::ClassId { .. }
                | SymbolKind::ConstantId { .. } => "0".to_string(),
            };
            w.println(&format!("{}: {},", entry.name, value));
        }
        w.pop_depth();
        w.println("}");
        w.pop_depth();
        w.println("}");
        w.blank();

        w.println("/// Resolve ids and singletons once; repeated execution of the");
        w.println("/// artifact never re-resolves them.");
        w.println("pub fn init(&mut self, env: &mut Env) {");
        w.push_depth();
        for entry in self.symbols.entries() {
            match &entry.kind {
                SymbolKind::Module { type_name } => w.println(&format!(
                    "self.{} = env.module_by_type_name(\"{}\");",
                    entry.name,
                    escape_str(type_name)
                )),
                SymbolKind::Regex { pattern } => w.println(&format!(
                    "self.{} = Pattern::compile(\"{}\");",
                    entry.name,
                    escape_str(pattern)
                )),
                SymbolKind::FunctionId { runtime_name } => w.println(&format!(
                    "self.{} = env.registry().function_id(\"{}\");",
                    entry.name,
                    escape_str(runtime_name)
                )),
                SymbolKind::ClassId { runtime_name } => w.println(&format!(
                    "self.{} = env.registry().class_id(\"{}\");",
                    entry.name,
                    escape_str(runtime_name)
                )),
                SymbolKind::ConstantId { runtime_name } => w.println(&format!(
                    "self.{} = env.registry().constant_id(\"{}\");",
                    entry.name,
                    escape_str(runtime_name)
                )),
                _ => {}
            }
        }
        w.pop_depth();
        w.println("}");
        w.pop_depth();
        w.println("}");
    }

    fn stmts(&mut self, w: &mut UnitWriter, stmts: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in stmts {
            self.stmt(w, stmt)?;
            // Nothing past a terminator is analyzed, so nothing past it may
            // be emitted: its variables were never declared.
            if !stmt_falls_through(stmt) {
                break;
            }
        }
        Ok(())
    }

    fn stmt(&mut self, w: &mut UnitWriter, stmt: &Stmt) -> Result<(), CodegenError> {
        w.set_location(stmt.location());
        match stmt {
            Stmt::Block { body, .. } => {
                w.println("{");
                w.push_depth();
                self.stmts(w, body)?;
                w.pop_depth();
                w.println("}");
            }
            Stmt::Expr { expr, .. } => {
                let rendered = self.render_expr(expr)?;
                w.println(&format!("{};", rendered));
            }
            Stmt::Assign { target, value, .. } => {
                let rendered = self.render_expr(value)?;
                w.println(&format!("{} = {};", var_ident(target), rendered));
            }
            Stmt::Echo { expr, .. } => {
                // Literal text prints straight from an interned character
                // array; anything else is evaluated and converted.
                if let ExprKind::Literal(Literal::Str(s)) = &expr.kind {
                    let field = self.symbols.add_char_array(s);
                    w.println(&format!("env.print_chars(&self.{});", field));
                } else {
                    let rendered = self.render_expr(expr)?;
                    w.println(&format!("env.print(&{});", rendered));
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let rendered = self.render_expr(cond)?;
                w.println(&format!("if {}.truthy() {{", rendered));
                w.push_depth();
                self.stmts(w, then_body)?;
                w.pop_depth();
                if else_body.is_empty() {
                    w.println("}");
                } else {
                    w.println("} else {");
                    w.push_depth();
                    self.stmts(w, else_body)?;
                    w.pop_depth();
                    w.println("}");
                }
            }
            Stmt::While { cond, body, .. } => {
                let rendered = self.render_expr(cond)?;
                w.println(&format!("while {}.truthy() {{", rendered));
                w.push_depth();
                w.println("env.check_timeout();");
                self.stmts(w, body)?;
                w.pop_depth();
                w.println("}");
            }
            Stmt::Break { .. } => w.println("break;"),
            Stmt::Continue { .. } => w.println("continue;"),
            Stmt::Return { value, .. } => match value {
                Some(expr) => {
                    let rendered = self.render_expr(expr)?;
                    w.println(&format!("return {};", rendered));
                }
                None => w.println("return Value::null();"),
            },
            Stmt::Try {
                body,
                catch_var,
                catch_body,
                ..
            } => {
                let mark = format!("t_{}", self.try_counter);
                self.try_counter += 1;
                w.println(&format!("let {} = env.begin_try();", mark));
                self.stmts(w, body)?;
                w.println(&format!("if let Some(trap) = env.end_try({}) {{", mark));
                w.push_depth();
                w.println(&format!("{} = trap.into_value();", var_ident(catch_var)));
                self.stmts(w, catch_body)?;
                w.pop_depth();
                w.println("}");
            }
            Stmt::Include { target, .. } => {
                let rendered = self.render_expr(target)?;
                w.println(&format!("env.include(&{});", rendered));
            }
        }
        Ok(())
    }

    fn render_expr(&mut self, expr: &Expr) -> Result<String, CodegenError> {
        Ok(match &expr.kind {
            ExprKind::Literal(Literal::Null) => "Value::null()".to_string(),
            ExprKind::Literal(Literal::Bool(b)) => format!("Value::bool({})", b),
            ExprKind::Literal(Literal::Int(i)) => format!("Value::int({})", i),
            ExprKind::Literal(Literal::Float(f)) => format!("Value::float({:?})", f),
            ExprKind::Literal(Literal::Str(s)) => {
                format!("self.{}.clone()", self.symbols.add_string_value(s))
            }
            ExprKind::Var(name) => format!("{}.clone()", var_ident(name)),
            ExprKind::ConstRef(name) => {
                format!("env.constant(self.{})", self.symbols.add_constant_id(name))
            }
            ExprKind::Call { name, args } => {
                let rendered = self.render_args(args)?;
                if let Some((module, method)) = name.split_once("::") {
                    // Namespaced calls dispatch through the module singleton.
                    let field = self.symbols.add_module(module);
                    format!(
                        "env.call_module(&self.{}, \"{}\", &[{}])",
                        field,
                        escape_str(&self.symbols.mangle(method)),
                        rendered
                    )
                } else {
                    let mangled = self.symbols.mangle(name);
                    if self.local_functions.contains(&mangled)
                        || self.runtime_functions.contains(&mangled)
                    {
                        let fid = self.symbols.add_function_id(name);
                        format!("env.call(self.{}, &[{}])", fid, rendered)
                    } else {
                        // Unknown at generation time; resolved per call.
                        format!(
                            "env.call_by_name(\"{}\", &[{}])",
                            escape_str(&mangled),
                            rendered
                        )
                    }
                }
            }
            ExprKind::New { class, args } => {
                let cid = self.symbols.add_class_id(class);
                format!("env.new_object(self.{}, &[{}])", cid, self.render_args(args)?)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.render_expr(left)?;
                let r = self.render_expr(right)?;
                format!("{}.{}(&{})", l, op.runtime_method(), r)
            }
            ExprKind::Unary { op, operand } => {
                let o = self.render_expr(operand)?;
                format!("{}.{}()", o, op.runtime_method())
            }
            ExprKind::Regex(pattern) => {
                format!("Value::pattern(&self.{})", self.symbols.add_regex(pattern))
            }
        })
    }

    fn render_args(&mut self, args: &[Expr]) -> Result<String, CodegenError> {
        let rendered: Result<Vec<_>, _> = args.iter().map(|a| self.render_expr(a)).collect();
        Ok(rendered?.join(", "))
    }

    /// Constant rendering for default arguments and class constants, which
    /// must be constructible without an environment.
    fn render_const_expr(&mut self, expr: &Expr) -> Result<String, CodegenError> {
        match &expr.kind {
            ExprKind::Literal(Literal::Null) => Ok("Value::null()".to_string()),
            ExprKind::Literal(Literal::Bool(b)) => Ok(format!("Value::bool({})", b)),
            ExprKind::Literal(Literal::Int(i)) => Ok(format!("Value::int({})", i)),
            ExprKind::Literal(Literal::Float(f)) => Ok(format!("Value::float({:?})", f)),
            ExprKind::Literal(Literal::Str(s)) => Ok(format!("Value::str(\"{}\")", escape_str(s))),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let inner = self.render_const_expr(operand)?;
                Ok(format!("{}.neg()", inner))
            }
            other => Err(CodegenError::UnsupportedDefault {
                location: expr.location.to_string(),
                reason: format!("expression kind {:?} is not constant", std::mem::discriminant(other)),
            }),
        }
    }

    /// The defaults array for one function: one constant per formal, filled
    /// with null where the script declares no default. Keyed by the identity
    /// of the default expression nodes, with filler slots for the rest.
    fn default_array(&mut self, func: &FunctionDecl) -> Result<String, CodegenError> {
        let mut ids = Vec::new();
        let mut sources = Vec::new();
        for param in &func.params {
            match &param.default {
                Some(expr) => {
                    ids.push(Some(expr.id));
                    sources.push(self.render_const_expr(expr)?);
                }
                None => {
                    ids.push(None);
                    sources.push("Value::null()".to_string());
                }
            }
        }
        Ok(self.symbols.add_expr_array(&ids, sources))
    }

    fn compilation_name(&self, key: &str) -> String {
        let mangled = self.symbols.mangle(key);
        mangled
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

fn var_ident(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("v_{}", safe)
}

/// Whether control can reach the end of a statement sequence.
fn falls_through(stmts: &[Stmt]) -> bool {
    stmts.iter().all(stmt_falls_through)
}

fn stmt_falls_through(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => false,
        Stmt::Block { body, .. } => falls_through(body),
        Stmt::If {
            then_body,
            else_body,
            ..
        } => else_body.is_empty() || falls_through(then_body) || falls_through(else_body),
        Stmt::Try {
            body, catch_body, ..
        } => falls_through(body) || falls_through(catch_body),
        _ => true,
    }
}

//! The compilation driver: analyze, generate, compile externally, load.
//!
//! One driver instance serves a whole runtime. Requests are keyed by script
//! path; the driver guarantees that at most one thread compiles a given
//! path at a time, that a finished artifact is reused until one of its
//! recorded dependencies changes, and that a caller racing a sibling
//! compilation waits for its result instead of duplicating the work.

use crate::artifact::{ArtifactManifest, CompilationArtifact, DependencyStamp};
use crate::cache::{Claim, CompileCache, CompileState};
use crate::class_name::{class_file_path, class_name_for};
use crate::error::DriverError;
use crate::external::{map_diagnostics, ExternalCompiler};
use crate::lazy::FunctionDirectory;
use brio_codegen::{GenerateOptions, GeneratedUnit};
use brio_core::program::{Expr, ExprKind, Stmt};
use brio_core::Program;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a thread blocked on a sibling compilation re-checks the cache.
const CONTENTION_POLL: Duration = Duration::from_millis(20);

/// Driver-wide configuration.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Directory the generated sources, artifacts, and manifests land in.
    pub work_dir: PathBuf,
    /// Also build instrumented profile siblings.
    pub profile: bool,
    /// Keep script identifier case when resolving runtime names.
    pub case_sensitive: bool,
    /// Wait for externally compiled functions a program calls before
    /// generating, so those call sites dispatch by id instead of by name.
    pub lazy: bool,
    /// How long a caller waits for a sibling compilation or a lazily
    /// compiled function before giving up.
    pub lazy_timeout: Duration,
    /// Functions other programs have already registered with the runtime.
    pub runtime_functions: Vec<String>,
}

impl DriverOptions {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            profile: false,
            case_sensitive: false,
            lazy: false,
            lazy_timeout: Duration::from_secs(120),
            runtime_functions: Vec::new(),
        }
    }
}

pub struct CompileDriver {
    options: DriverOptions,
    compiler: Box<dyn ExternalCompiler>,
    cache: CompileCache,
    directory: FunctionDirectory,
}

impl CompileDriver {
    pub fn new(options: DriverOptions, compiler: Box<dyn ExternalCompiler>) -> Self {
        Self {
            options,
            compiler,
            cache: CompileCache::new(),
            directory: FunctionDirectory::new(),
        }
    }

    /// Compile a program, or reuse its cached artifact when nothing it
    /// depends on has changed. A second thread asking for a path that is
    /// already compiling waits for the first to finish.
    pub fn compile(&self, program: &Program) -> Result<CompilationArtifact, DriverError> {
        program.ensure_compilable()?;
        let path = program.source_path.clone();
        let class_name = class_name_for(&path);

        let start = Instant::now();
        loop {
            match self.cache.try_begin(&path) {
                Claim::Ready(artifact) => {
                    debug!(path = %path.display(), "artifact still valid, skipping recompilation");
                    return Ok(artifact);
                }
                Claim::InFlight => {
                    // A sibling owns this path. Wait for it to finish or
                    // fail; a failure reclaims the path on the next check.
                    let waited = start.elapsed();
                    if waited >= self.options.lazy_timeout {
                        return Err(DriverError::CompileContention { waited });
                    }
                    std::thread::sleep(CONTENTION_POLL);
                }
                Claim::Acquired => break,
            }
        }

        let result = self.compile_owned(program, &path, &class_name);
        if result.is_err() {
            self.cache.set_state(&path, CompileState::Failed);
        }
        result
    }

    fn compile_owned(
        &self,
        program: &Program,
        path: &Path,
        class_name: &str,
    ) -> Result<CompilationArtifact, DriverError> {
        info!(path = %path.display(), class_name, "compiling");

        let mut runtime_functions = self.options.runtime_functions.clone();
        if self.options.lazy {
            runtime_functions.extend(self.await_external_calls(program)?);
        }

        let dependencies = vec![DependencyStamp::capture(path)];
        self.cache.set_state(path, CompileState::Generating);
        let gen_options = GenerateOptions {
            profile: self.options.profile,
            case_sensitive: self.options.case_sensitive,
            runtime_functions,
            dependencies: dependencies
                .iter()
                .map(|d| (d.path.to_string_lossy().into_owned(), d.mtime_ms))
                .collect(),
        };
        let units = brio_codegen::generate(program, class_name, &gen_options)?;

        std::fs::create_dir_all(&self.options.work_dir)?;
        self.cache
            .set_state(path, CompileState::PendingExternalCompile);
        for unit in &units {
            self.compile_unit(unit)?;
        }

        let primary = &units[0];
        let source_file = class_file_path(&self.options.work_dir, class_name);
        let manifest =
            ArtifactManifest::new(class_name, path, dependencies, primary.line_map.clone());
        manifest.save(&ArtifactManifest::manifest_path(&source_file))?;

        let artifact = CompilationArtifact {
            class_name: class_name.to_string(),
            source_file,
            line_map: primary.line_map.clone(),
            manifest,
        };
        self.cache.store(path, artifact.clone());

        self.directory.publish(class_name);
        for func in &program.functions {
            self.directory.publish(&self.runtime_name(&func.name));
        }
        info!(path = %path.display(), class_name, "compiled");
        Ok(artifact)
    }

    fn compile_unit(&self, unit: &GeneratedUnit) -> Result<(), DriverError> {
        let file = class_file_path(&self.options.work_dir, &unit.class_name);
        std::fs::write(&file, &unit.source)?;
        let diagnostics = self.compiler.compile(&file, &self.options.work_dir)?;
        if diagnostics.is_empty() {
            return Ok(());
        }
        let mapped = map_diagnostics(diagnostics, &unit.line_map);
        warn!(
            class_name = %unit.class_name,
            count = mapped.len(),
            "external compilation failed"
        );
        Err(DriverError::Diagnostics(mapped))
    }

    /// Adopt an artifact left by an earlier process, without recompiling,
    /// when its manifest still matches the filesystem.
    pub fn preload(&self, source_path: &Path) -> Result<Option<CompilationArtifact>, DriverError> {
        let class_name = class_name_for(source_path);
        let source_file = class_file_path(&self.options.work_dir, &class_name);
        let manifest_path = ArtifactManifest::manifest_path(&source_file);
        if !manifest_path.exists() {
            return Ok(None);
        }
        let manifest = ArtifactManifest::load(&manifest_path)?;
        if manifest.class_name != class_name {
            warn!(path = %manifest_path.display(), "manifest names a different class, ignoring");
            return Ok(None);
        }
        if manifest.is_modified() {
            debug!(path = %source_path.display(), "preloaded artifact is stale");
            return Ok(None);
        }
        let artifact = CompilationArtifact {
            class_name: class_name.clone(),
            source_file,
            line_map: manifest.line_map.clone(),
            manifest,
        };
        self.cache.store(source_path, artifact.clone());
        self.directory.publish(&class_name);
        info!(path = %source_path.display(), class_name, "preloaded artifact");
        Ok(Some(artifact))
    }

    /// Move a compiled artifact to the loaded state and hand it out.
    pub fn load(&self, source_path: &Path) -> Result<CompilationArtifact, DriverError> {
        match self.cache.state(source_path) {
            CompileState::Compiled => {
                let artifact = self
                    .cache
                    .artifact(source_path)
                    .ok_or_else(|| DriverError::NotLoadable(source_path.display().to_string()))?;
                self.cache.set_state(source_path, CompileState::Loaded);
                debug!(path = %source_path.display(), "loaded");
                Ok(artifact)
            }
            CompileState::Loaded => self
                .cache
                .artifact(source_path)
                .ok_or_else(|| DriverError::NotLoadable(source_path.display().to_string())),
            _ => Err(DriverError::NotLoadable(
                source_path.display().to_string(),
            )),
        }
    }

    pub fn state(&self, source_path: &Path) -> CompileState {
        self.cache.state(source_path)
    }

    /// Forget a path entirely; the next request recompiles from scratch.
    pub fn invalidate(&self, source_path: &Path) {
        self.cache.invalidate(source_path);
    }

    pub fn directory(&self) -> &FunctionDirectory {
        &self.directory
    }

    /// Whether an artifact manifest for this script is already on disk.
    /// A pure probe; nothing is adopted or validated.
    pub fn preload_exists(&self, source_path: &Path) -> bool {
        let class_name = class_name_for(source_path);
        let source_file = class_file_path(&self.options.work_dir, &class_name);
        ArtifactManifest::manifest_path(&source_file).exists()
    }

    /// Where the generated source for this script lands.
    pub fn class_file_path(&self, source_path: &Path) -> PathBuf {
        class_file_path(&self.options.work_dir, &class_name_for(source_path))
    }

    /// Wait for every function the program calls but does not declare, so
    /// the emitter can wire those call sites by id. Functions nobody ever
    /// publishes time out rather than silently downgrading the call sites.
    fn await_external_calls(&self, program: &Program) -> Result<Vec<String>, DriverError> {
        let declared: BTreeSet<String> = program
            .functions
            .iter()
            .map(|f| self.runtime_name(&f.name))
            .collect();
        let mut external = Vec::new();
        for name in called_functions(program) {
            let runtime_name = self.runtime_name(&name);
            if declared.contains(&runtime_name) {
                continue;
            }
            self.directory
                .wait_ready(&runtime_name, self.options.lazy_timeout)?;
            external.push(runtime_name);
        }
        Ok(external)
    }

    fn runtime_name(&self, name: &str) -> String {
        if self.options.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }
}

/// Every plain function name a program calls, in deterministic order.
/// Namespaced calls dispatch through module singletons and are not
/// cross-program references.
fn called_functions(program: &Program) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_calls_stmt(&program.top, &mut names);
    for func in &program.functions {
        for stmt in &func.body {
            collect_calls_stmt(stmt, &mut names);
        }
    }
    for class in &program.classes {
        for method in &class.methods {
            for stmt in &method.body {
                collect_calls_stmt(stmt, &mut names);
            }
        }
    }
    names
}

fn collect_calls_stmt(stmt: &Stmt, names: &mut BTreeSet<String>) {
    match stmt {
        Stmt::Block { body, .. } => {
            for s in body {
                collect_calls_stmt(s, names);
            }
        }
        Stmt::Expr { expr, .. }
        | Stmt::Echo { expr, .. }
        | Stmt::Include { target: expr, .. } => collect_calls_expr(expr, names),
        Stmt::Assign { value, .. } => collect_calls_expr(value, names),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            collect_calls_expr(cond, names);
            for s in then_body.iter().chain(else_body) {
                collect_calls_stmt(s, names);
            }
        }
        Stmt::While { cond, body, .. } => {
            collect_calls_expr(cond, names);
            for s in body {
                collect_calls_stmt(s, names);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                collect_calls_expr(value, names);
            }
        }
        Stmt::Try {
            body, catch_body, ..
        } => {
            for s in body.iter().chain(catch_body) {
                collect_calls_stmt(s, names);
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
    }
}

fn collect_calls_expr(expr: &Expr, names: &mut BTreeSet<String>) {
    match &expr.kind {
        ExprKind::Call { name, args } => {
            if !name.contains("::") {
                names.insert(name.clone());
            }
            for arg in args {
                collect_calls_expr(arg, names);
            }
        }
        ExprKind::New { args, .. } => {
            for arg in args {
                collect_calls_expr(arg, names);
            }
        }
        ExprKind::Binary { left, right, .. } => {
            collect_calls_expr(left, names);
            collect_calls_expr(right, names);
        }
        ExprKind::Unary { operand, .. } => collect_calls_expr(operand, names),
        ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::ConstRef(_) | ExprKind::Regex(_) => {}
    }
}

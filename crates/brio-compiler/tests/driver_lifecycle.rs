//! Driver lifecycle tests: compile, cache reuse, preload, load, failure.
//!
//! The external compiler is faked so tests can count invocations and inject
//! diagnostics without a toolchain on the path.

use brio_compiler::{
    CompilationArtifact, CompileDriver, CompileState, CompilerDiagnostic, DriverError,
    DriverOptions, ExternalCompiler,
};
use brio_core::location::SourceLocation;
use brio_core::program::{Expr, ExprFactory, ExprKind, FunctionDecl, Literal, Program, Stmt};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Records every invocation; optionally fails each one with canned
/// diagnostics. Clones share the invocation log, so a test can keep a
/// handle after boxing the compiler into the driver.
#[derive(Default, Clone)]
struct FakeCompiler {
    invocations: Arc<Mutex<Vec<PathBuf>>>,
    diagnostics: Vec<CompilerDiagnostic>,
    delay: Option<std::time::Duration>,
}

impl FakeCompiler {
    fn failing(diagnostics: Vec<CompilerDiagnostic>) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }

    fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

impl ExternalCompiler for FakeCompiler {
    fn compile(
        &self,
        source_file: &Path,
        _work_dir: &Path,
    ) -> Result<Vec<CompilerDiagnostic>, std::io::Error> {
        self.invocations
            .lock()
            .unwrap()
            .push(source_file.to_path_buf());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.diagnostics.clone())
    }
}

fn loc(line: u32) -> SourceLocation {
    SourceLocation::new("t.brio", line)
}

fn literal_return(f: &mut ExprFactory, v: i64) -> Vec<Stmt> {
    let value = f.expr(ExprKind::Literal(Literal::Int(v)), loc(2));
    vec![Stmt::Return {
        value: Some(value),
        location: loc(2),
    }]
}

fn two_function_program(source_path: &Path) -> Program {
    let mut f = ExprFactory::new();
    let first = FunctionDecl {
        name: "first".to_string(),
        params: vec![],
        body: literal_return(&mut f, 1),
        location: loc(1),
    };
    let second = FunctionDecl {
        name: "second".to_string(),
        params: vec![],
        body: literal_return(&mut f, 2),
        location: loc(3),
    };
    let call: Expr = f.expr(
        ExprKind::Call {
            name: "first".to_string(),
            args: vec![],
        },
        loc(5),
    );
    Program {
        source_path: source_path.to_path_buf(),
        top: Stmt::Block {
            body: vec![Stmt::Expr {
                expr: call,
                location: loc(5),
            }],
            location: loc(1),
        },
        functions: vec![first, second],
        classes: vec![],
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    script: PathBuf,
    work_dir: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("t.brio");
    std::fs::write(&script, "fn first() {}\nfn second() {}\nfirst()").unwrap();
    let work_dir = dir.path().join("work");
    Fixture {
        script,
        work_dir,
        _dir: dir,
    }
}

fn driver(fx: &Fixture, compiler: FakeCompiler) -> CompileDriver {
    CompileDriver::new(DriverOptions::new(&fx.work_dir), Box::new(compiler))
}

fn read_generated(artifact: &CompilationArtifact) -> String {
    std::fs::read_to_string(&artifact.source_file).unwrap()
}

#[test]
fn compile_writes_unit_with_distinct_function_ids() {
    let fx = fixture();
    let driver = driver(&fx, FakeCompiler::default());
    let program = two_function_program(&fx.script);

    let artifact = driver.compile(&program).unwrap();
    assert_eq!(driver.state(&fx.script), CompileState::Compiled);

    let source = read_generated(&artifact);
    assert!(source.contains("fn fun_first"), "{}", source);
    assert!(source.contains("fn fun_second"), "{}", source);
    assert_eq!(source.matches("table.set_function(").count(), 2);
    // Distinct ids for distinct functions.
    assert!(source.contains("fid_first"), "{}", source);
    assert!(source.contains("fid_second"), "{}", source);
}

#[test]
fn unchanged_source_compiles_only_once() {
    let fx = fixture();
    let fake = FakeCompiler::default();
    let driver = driver(&fx, fake.clone());
    let program = two_function_program(&fx.script);

    let first = driver.compile(&program).unwrap();
    let second = driver.compile(&program).unwrap();
    assert_eq!(first.class_name, second.class_name);

    // A valid cached artifact means the external compiler ran exactly once.
    assert_eq!(fake.invocation_count(), 1);
    assert_eq!(driver.state(&fx.script), CompileState::Compiled);
}

#[test]
fn invalidation_forces_recompilation() {
    let fx = fixture();
    let fake = FakeCompiler::default();
    let driver = driver(&fx, fake.clone());
    let program = two_function_program(&fx.script);

    driver.compile(&program).unwrap();
    driver.invalidate(&fx.script);
    assert_eq!(driver.state(&fx.script), CompileState::NotCompiled);
    driver.compile(&program).unwrap();
    assert_eq!(driver.state(&fx.script), CompileState::Compiled);
    assert_eq!(fake.invocation_count(), 2);
}

#[test]
fn load_promotes_compiled_artifact() {
    let fx = fixture();
    let driver = driver(&fx, FakeCompiler::default());
    let program = two_function_program(&fx.script);

    driver.compile(&program).unwrap();
    let artifact = driver.load(&fx.script).unwrap();
    assert_eq!(driver.state(&fx.script), CompileState::Loaded);
    // Loading again is idempotent.
    let again = driver.load(&fx.script).unwrap();
    assert_eq!(artifact.class_name, again.class_name);
}

#[test]
fn load_without_compile_is_rejected() {
    let fx = fixture();
    let driver = driver(&fx, FakeCompiler::default());
    let err = driver.load(&fx.script).unwrap_err();
    assert!(matches!(err, DriverError::NotLoadable(_)));
}

#[test]
fn preload_adopts_artifact_from_earlier_process() {
    let fx = fixture();
    let program = two_function_program(&fx.script);
    {
        let first_process = driver(&fx, FakeCompiler::default());
        first_process.compile(&program).unwrap();
    }

    let second_process = driver(&fx, FakeCompiler::default());
    let preloaded = second_process.preload(&fx.script).unwrap();
    let artifact = preloaded.expect("manifest on disk should be adopted");
    assert_eq!(second_process.state(&fx.script), CompileState::Compiled);
    assert!(second_process.directory().is_ready(&artifact.class_name));
    second_process.load(&fx.script).unwrap();
}

#[test]
fn preload_rejects_stale_artifact() {
    let fx = fixture();
    let program = two_function_program(&fx.script);
    {
        let first_process = driver(&fx, FakeCompiler::default());
        first_process.compile(&program).unwrap();
    }

    // The script disappearing definitely invalidates the stamp.
    std::fs::remove_file(&fx.script).unwrap();
    let second_process = driver(&fx, FakeCompiler::default());
    assert!(second_process.preload(&fx.script).unwrap().is_none());
}

#[test]
fn preload_without_manifest_is_none() {
    let fx = fixture();
    let driver = driver(&fx, FakeCompiler::default());
    assert!(driver.preload(&fx.script).unwrap().is_none());
}

#[test]
fn diagnostics_map_back_to_script_lines() {
    let fx = fixture();
    let program = two_function_program(&fx.script);

    // Probe which generated line the return statement of `first` lands on,
    // then fail compilation at exactly that line.
    let probe_driver = driver(&fx, FakeCompiler::default());
    let artifact = probe_driver.compile(&program).unwrap();
    let source = read_generated(&artifact);
    let bad_line = source
        .lines()
        .position(|l| l.contains("return Value::int(1);"))
        .expect("return emitted") as u32
        + 1;

    let failing = FakeCompiler::failing(vec![CompilerDiagnostic {
        file: artifact.source_file.clone(),
        line: bad_line,
        message: "mismatched types".to_string(),
    }]);
    let failing_driver = CompileDriver::new(
        DriverOptions::new(&fx.work_dir),
        Box::new(failing),
    );
    let err = failing_driver.compile(&program).unwrap_err();
    match err {
        DriverError::Diagnostics(mapped) => {
            assert_eq!(mapped.len(), 1);
            let script = mapped[0].script.as_ref().expect("position mapped");
            assert_eq!(script.line, 2);
        }
        other => panic!("expected diagnostics, got {}", other),
    }
    assert_eq!(failing_driver.state(&fx.script), CompileState::Failed);
}

#[test]
fn failed_compilation_is_retried_not_cached() {
    let fx = fixture();
    let program = two_function_program(&fx.script);
    let failing = FakeCompiler::failing(vec![CompilerDiagnostic {
        file: PathBuf::from("x.rs"),
        line: 1,
        message: "boom".to_string(),
    }]);
    let driver = driver(&fx, failing);

    assert!(driver.compile(&program).is_err());
    assert_eq!(driver.state(&fx.script), CompileState::Failed);
    // A failed entry does not satisfy later requests from the cache.
    assert!(driver.compile(&program).is_err());
}

#[test]
fn concurrent_requests_compile_once() {
    let fx = fixture();
    let fake = FakeCompiler::slow(std::time::Duration::from_millis(50));
    let driver = Arc::new(CompileDriver::new(
        DriverOptions::new(&fx.work_dir),
        Box::new(fake.clone()),
    ));
    let program = Arc::new(two_function_program(&fx.script));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let driver = Arc::clone(&driver);
            let program = Arc::clone(&program);
            std::thread::spawn(move || driver.compile(&program).map(|a| a.class_name))
        })
        .collect();
    let names: Vec<String> = workers
        .into_iter()
        .map(|w| w.join().unwrap().unwrap())
        .collect();

    assert!(names.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(fake.invocation_count(), 1);
}

#[test]
fn contention_timeout_is_distinct_from_lazy_timeout() {
    let fx = fixture();
    let mut options = DriverOptions::new(&fx.work_dir);
    options.lazy_timeout = std::time::Duration::from_millis(60);
    let fake = FakeCompiler::slow(std::time::Duration::from_millis(300));
    let driver = Arc::new(CompileDriver::new(options, Box::new(fake)));
    let program = Arc::new(two_function_program(&fx.script));

    let owner = {
        let driver = Arc::clone(&driver);
        let program = Arc::clone(&program);
        std::thread::spawn(move || driver.compile(&program).map(|a| a.class_name))
    };
    std::thread::sleep(std::time::Duration::from_millis(50));

    // The sibling gives up while the owner still holds the path; the error
    // names contention, not a missing lazily compiled function.
    let err = driver.compile(&program).unwrap_err();
    assert!(matches!(err, DriverError::CompileContention { .. }));
    assert!(owner.join().unwrap().is_ok());
}

#[test]
fn preload_exists_probes_without_adopting() {
    let fx = fixture();
    let program = two_function_program(&fx.script);
    let driver = driver(&fx, FakeCompiler::default());

    assert!(!driver.preload_exists(&fx.script));
    driver.compile(&program).unwrap();
    assert!(driver.preload_exists(&fx.script));

    // The probe says nothing about cache state in a fresh driver.
    let fresh = CompileDriver::new(
        DriverOptions::new(&fx.work_dir),
        Box::new(FakeCompiler::default()),
    );
    assert!(fresh.preload_exists(&fx.script));
    assert_eq!(fresh.state(&fx.script), CompileState::NotCompiled);
}

#[test]
fn lazy_mode_waits_for_published_externals() {
    let fx = fixture();
    let mut options = DriverOptions::new(&fx.work_dir);
    options.lazy = true;
    options.lazy_timeout = std::time::Duration::from_millis(200);
    let driver = CompileDriver::new(options, Box::new(FakeCompiler::default()));

    // The program calls helper(), declared by some other program.
    let mut f = ExprFactory::new();
    let call = f.expr(
        ExprKind::Call {
            name: "helper".to_string(),
            args: vec![],
        },
        loc(1),
    );
    let program = Program {
        source_path: fx.script.clone(),
        top: Stmt::Block {
            body: vec![Stmt::Expr {
                expr: call,
                location: loc(1),
            }],
            location: loc(1),
        },
        functions: vec![],
        classes: vec![],
    };

    driver.directory().publish("helper");
    let artifact = driver.compile(&program).unwrap();
    let source = std::fs::read_to_string(&artifact.source_file).unwrap();
    // The external call dispatches by id once the function is known.
    assert!(source.contains("env.call(self.fid_helper"), "{}", source);
}

#[test]
fn lazy_mode_times_out_on_missing_externals() {
    let fx = fixture();
    let mut options = DriverOptions::new(&fx.work_dir);
    options.lazy = true;
    options.lazy_timeout = std::time::Duration::from_millis(30);
    let driver = CompileDriver::new(options, Box::new(FakeCompiler::default()));

    let mut f = ExprFactory::new();
    let call = f.expr(
        ExprKind::Call {
            name: "never_published".to_string(),
            args: vec![],
        },
        loc(1),
    );
    let program = Program {
        source_path: fx.script.clone(),
        top: Stmt::Block {
            body: vec![Stmt::Expr {
                expr: call,
                location: loc(1),
            }],
            location: loc(1),
        },
        functions: vec![],
        classes: vec![],
    };

    let err = driver.compile(&program).unwrap_err();
    assert!(matches!(err, DriverError::LazyWaitTimeout { .. }));
    assert_eq!(driver.state(&fx.script), CompileState::Failed);
}

#[test]
fn profile_mode_writes_sibling_unit() {
    let fx = fixture();
    let mut options = DriverOptions::new(&fx.work_dir);
    options.profile = true;
    let driver = CompileDriver::new(options, Box::new(FakeCompiler::default()));
    let program = two_function_program(&fx.script);

    let artifact = driver.compile(&program).unwrap();
    let sibling = fx
        .work_dir
        .join(format!("{}_prof.rs", artifact.class_name));
    let sibling_source = std::fs::read_to_string(&sibling).unwrap();
    assert!(sibling_source.contains("env.profile_hit"));
}

//! The external-compiler seam.
//!
//! The driver never compiles generated source itself; it shells out through
//! [`ExternalCompiler`]. Production uses [`CommandCompiler`] around the
//! installed toolchain; tests substitute a fake that records invocations.

use brio_core::{LineMap, SourceLocation};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// One diagnostic from the external compiler, positioned in the generated
/// source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerDiagnostic {
    pub file: PathBuf,
    /// 1-based line in the generated source; zero when the compiler gave no
    /// position.
    pub line: u32,
    pub message: String,
}

/// A diagnostic translated back to the script that produced the generated
/// line, when the line map covers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDiagnostic {
    pub generated: CompilerDiagnostic,
    pub script: Option<SourceLocation>,
}

impl std::fmt::Display for MappedDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.script {
            Some(loc) => write!(f, "{}: {}", loc, self.generated.message),
            None => write!(
                f,
                "{}:{}: {}",
                self.generated.file.display(),
                self.generated.line,
                self.generated.message
            ),
        }
    }
}

/// Map a batch of diagnostics through a generated unit's line map.
pub fn map_diagnostics(
    diagnostics: Vec<CompilerDiagnostic>,
    line_map: &LineMap,
) -> Vec<MappedDiagnostic> {
    diagnostics
        .into_iter()
        .map(|d| {
            let script = if d.line > 0 {
                line_map.lookup(d.line).cloned()
            } else {
                None
            };
            MappedDiagnostic {
                generated: d,
                script,
            }
        })
        .collect()
}

/// Compiles one generated source file into a loadable artifact.
pub trait ExternalCompiler: Send + Sync {
    /// Compile `source_file` into `work_dir`. An empty diagnostics vector
    /// means success.
    fn compile(
        &self,
        source_file: &Path,
        work_dir: &Path,
    ) -> Result<Vec<CompilerDiagnostic>, std::io::Error>;
}

/// Invokes an installed compiler executable and parses its stderr.
///
/// Extra arguments come before the source file; the work directory is
/// passed through `--out-dir`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl ExternalCompiler for CommandCompiler {
    fn compile(
        &self,
        source_file: &Path,
        work_dir: &Path,
    ) -> Result<Vec<CompilerDiagnostic>, std::io::Error> {
        debug!(
            program = %self.program.display(),
            source = %source_file.display(),
            "invoking external compiler"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--out-dir")
            .arg(work_dir)
            .arg(source_file)
            .output()?;

        if output.status.success() {
            return Ok(Vec::new());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = parse_diagnostics(&stderr);
        if diagnostics.is_empty() {
            // The compiler failed without a parseable position; surface the
            // raw output rather than losing it.
            warn!(status = ?output.status, "external compiler failed without diagnostics");
            return Ok(vec![CompilerDiagnostic {
                file: source_file.to_path_buf(),
                line: 0,
                message: stderr.trim().to_string(),
            }]);
        }
        Ok(diagnostics)
    }
}

/// Parse `file:line: message` lines out of compiler stderr. Lines that do
/// not match are ignored; they are context the positioned lines summarize.
fn parse_diagnostics(stderr: &str) -> Vec<CompilerDiagnostic> {
    let mut out = Vec::new();
    for line in stderr.lines() {
        if let Some(diag) = parse_diagnostic_line(line) {
            out.push(diag);
        }
    }
    out
}

fn parse_diagnostic_line(line: &str) -> Option<CompilerDiagnostic> {
    // Scan separator by separator so Windows drive letters and absolute
    // paths with colons still parse.
    let mut search_from = 0;
    while let Some(rel) = line[search_from..].find(':') {
        let first = search_from + rel;
        let rest = &line[first + 1..];
        if let Some(second_rel) = rest.find(':') {
            let line_part = &rest[..second_rel];
            if let Ok(line_no) = line_part.trim().parse::<u32>() {
                let message = rest[second_rel + 1..].trim();
                if !message.is_empty() {
                    return Some(CompilerDiagnostic {
                        file: PathBuf::from(&line[..first]),
                        line: line_no,
                        message: message.to_string(),
                    });
                }
            }
        }
        search_from = first + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diagnostic_line() {
        let diag = parse_diagnostic_line("work/C_a_12ab34cd.rs:41: mismatched types").unwrap();
        assert_eq!(diag.file, PathBuf::from("work/C_a_12ab34cd.rs"));
        assert_eq!(diag.line, 41);
        assert_eq!(diag.message, "mismatched types");
    }

    #[test]
    fn test_parse_skips_unpositioned_lines() {
        assert_eq!(parse_diagnostic_line("compilation failed"), None);
        assert_eq!(parse_diagnostic_line("note: see above"), None);
    }

    #[test]
    fn test_parse_handles_extra_colons_in_path() {
        let diag = parse_diagnostic_line("C:/work/unit.rs:7: unexpected token").unwrap();
        assert_eq!(diag.file, PathBuf::from("C:/work/unit.rs"));
        assert_eq!(diag.line, 7);
    }

    #[test]
    fn test_map_diagnostics_translates_positions() {
        let mut map = LineMap::new();
        map.record(10, SourceLocation::new("a.brio", 3));
        let mapped = map_diagnostics(
            vec![
                CompilerDiagnostic {
                    file: PathBuf::from("unit.rs"),
                    line: 11,
                    message: "bad".to_string(),
                },
                CompilerDiagnostic {
                    file: PathBuf::from("unit.rs"),
                    line: 2,
                    message: "early".to_string(),
                },
            ],
            &map,
        );
        assert_eq!(mapped[0].script.as_ref().unwrap().line, 3);
        assert_eq!(mapped[1].script, None);
        assert_eq!(mapped[0].to_string(), "a.brio:3: bad");
    }
}

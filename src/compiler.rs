//! Static checker invocation
//!
//! Runs the target language's type checker over the emitted artifacts and
//! turns its output into diagnostics. The checker is an external process
//! with a hard deadline; every way it can fail ends up as a diagnostic, so
//! validation itself never returns an error.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codegen::EmittedArtifact;
use crate::diagnostics::{codes, Diagnostics, Location, Severity, Stage, ValidationDiagnostic};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Checker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub enabled: bool,
    /// Program followed by its fixed arguments; file names are appended
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Additional source files passed to the checker. Relative paths are
    /// resolved against the output directory, also in dry runs.
    pub extra_sources: Vec<PathBuf>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: ["tsc", "--noEmit", "--pretty", "false", "--strict", "--target", "es2020"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 120,
            extra_sources: Vec::new(),
        }
    }
}

/// Grade a checker error code
pub fn classify(code: &str) -> Severity {
    const CRITICAL: &[&str] = &[
        "TS2304", "TS2305", "TS2307", "TS2503", "TS2552", "TS2583", "TS2614", "TS2724", "TS2792",
        "TS6053",
    ];
    const HIGH: &[&str] = &[
        "TS2322", "TS2339", "TS2345", "TS2353", "TS2416", "TS2550", "TS2551", "TS2559", "TS2739",
        "TS2740", "TS2741",
    ];
    const MEDIUM: &[&str] = &[
        "TS7005", "TS7006", "TS7008", "TS7031", "TS7034", "TS7053", "TS2531", "TS2532", "TS18046",
        "TS18047", "TS18048",
    ];

    if CRITICAL.contains(&code) {
        Severity::Critical
    } else if HIGH.contains(&code) {
        Severity::High
    } else if MEDIUM.contains(&code) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn diagnostic_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.+?)\((\d+),(\d+)\): (error|warning) (TS\d+): (.*)$").ok())
        .as_ref()
}

/// Diagnostics not tied to a source position, such as a missing input file
fn global_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(error|warning) (TS\d+): (.*)$").ok())
        .as_ref()
}

fn graded(kind: &str, code: &str) -> Severity {
    if kind == "warning" {
        Severity::Low
    } else {
        classify(code)
    }
}

/// Parse checker output lines of the form `file(line,col): error TSnnnn: message`
/// or, for project-level problems, `error TSnnnn: message`
pub fn parse_output(output: &str) -> Vec<ValidationDiagnostic> {
    let (Some(pattern), Some(global)) = (diagnostic_pattern(), global_pattern()) else {
        return Vec::new();
    };

    let mut diagnostics: Vec<ValidationDiagnostic> = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if let Some(caps) = global.captures(line) {
            let code = &caps[2];
            diagnostics.push(ValidationDiagnostic::new(
                Stage::Validating,
                graded(&caps[1], code),
                code,
                &caps[3],
            ));
            continue;
        }
        match pattern.captures(line) {
            Some(caps) => {
                let code = &caps[5];
                let location = Location::at(
                    &caps[1],
                    caps[2].parse().unwrap_or(0),
                    caps[3].parse().unwrap_or(0),
                );
                diagnostics.push(
                    ValidationDiagnostic::new(Stage::Validating, graded(&caps[4], code), code, &caps[6])
                        .with_location(location),
                );
            }
            // Continuation lines of a multi-line message are indented
            None if line.starts_with(' ') && !line.trim().is_empty() => {
                if let Some(last) = diagnostics.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line.trim());
                }
            }
            None => {}
        }
    }
    diagnostics
}

#[derive(Debug)]
enum Completion {
    Exited(ExitStatus),
    TimedOut,
}

/// Runs the configured checker against emitted artifacts
pub struct CompilationValidator {
    config: CheckerConfig,
    /// Base for relative `extra_sources`; the checker's working directory when unset
    source_root: Option<PathBuf>,
}

impl CompilationValidator {
    pub fn new(config: CheckerConfig) -> Self {
        Self {
            config,
            source_root: None,
        }
    }

    /// Resolve relative extra sources against `root` instead of the checked directory
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    fn extra_sources(&self) -> Vec<PathBuf> {
        self.config
            .extra_sources
            .iter()
            .map(|source| match &self.source_root {
                Some(root) if source.is_relative() => root.join(source),
                _ => source.clone(),
            })
            .collect()
    }

    /// Check the artifacts in `dir`.
    pub fn validate(&self, dir: &Path, artifacts: &[EmittedArtifact]) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();

        if !self.config.enabled {
            info!("Static checker disabled; skipping compilation check");
            diagnostics.push(ValidationDiagnostic::new(
                Stage::Validating,
                Severity::Low,
                codes::CHECKER_SKIPPED,
                "static checker disabled by configuration",
            ));
            return diagnostics;
        }

        let Some((program, fixed_args)) = self.config.command.split_first() else {
            diagnostics.push(critical(
                codes::CHECKER_UNAVAILABLE,
                "checker command is empty".to_string(),
            ));
            return diagnostics;
        };

        let mut command = Command::new(program);
        command
            .args(fixed_args)
            .args(artifacts.iter().map(|a| a.file_name.as_str()))
            .args(self.extra_sources())
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(program = %program, dir = %dir.display(), "Spawning checker");
        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "Checker could not be started");
                diagnostics.push(critical(
                    codes::CHECKER_UNAVAILABLE,
                    format!("failed to start checker '{}': {}", program, e),
                ));
                return diagnostics;
            }
        };

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let completion = wait_with_deadline(&mut child, timeout);

        match completion {
            // Readers are left detached; a killed checker's children may still hold the pipes
            Ok(Completion::TimedOut) => {
                warn!(timeout_secs = self.config.timeout_secs, "Checker timed out");
                diagnostics.push(critical(
                    codes::CHECKER_TIMEOUT,
                    format!("checker did not finish within {}s", self.config.timeout_secs),
                ));
            }
            Ok(Completion::Exited(status)) => {
                let stdout = join_reader(stdout);
                let stderr = join_reader(stderr);
                let parsed = parse_output(&format!("{}\n{}", stdout, stderr));
                info!(
                    exit = ?status.code(),
                    diagnostics = parsed.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Checker finished"
                );
                if !status.success() && parsed.is_empty() {
                    diagnostics.push(critical(
                        codes::CHECKER_CRASHED,
                        format!(
                            "checker exited with {} and produced no diagnostics: {}",
                            describe(status),
                            excerpt(&stderr, &stdout)
                        ),
                    ));
                } else {
                    diagnostics.extend(parsed);
                }
            }
            Err(e) => {
                diagnostics.push(critical(
                    codes::CHECKER_CRASHED,
                    format!("lost track of checker process: {}", e),
                ));
            }
        }

        diagnostics
    }
}

fn critical(code: &str, message: String) -> ValidationDiagnostic {
    ValidationDiagnostic::new(Stage::Validating, Severity::Critical, code, message)
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<String>> {
    source.map(|mut source| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = source.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Poll the child until it exits or the deadline passes; kill it on expiry
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Completion> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Completion::Exited(status));
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let _ = child.kill();
    let reap_deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < reap_deadline {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => break,
            Ok(None) => thread::sleep(POLL_INTERVAL),
        }
    }
    Ok(Completion::TimedOut)
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

fn excerpt(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    if text.is_empty() {
        return "<no output>".to_string();
    }
    let mut out: String = text.chars().take(400).collect();
    if out.len() < text.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_tables() {
        assert_eq!(classify("TS2304"), Severity::Critical);
        assert_eq!(classify("TS2792"), Severity::Critical);
        assert_eq!(classify("TS2322"), Severity::High);
        assert_eq!(classify("TS7006"), Severity::Medium);
        assert_eq!(classify("TS18048"), Severity::Medium);
        assert_eq!(classify("TS2550"), Severity::High);
        assert_eq!(classify("TS6053"), Severity::Critical);
        assert_eq!(classify("TS1005"), Severity::Low);
    }

    #[test]
    fn test_parse_output() {
        let output = "types.generated.ts(3,5): error TS2304: Cannot find name 'Foo'.\n\
                      utils.generated.ts(10,1): error TS2322: Type 'string' is not assignable to type 'number'.\n  \
                      Some detail line.\n\
                      garbage that is not a diagnostic\n\
                      utils.generated.ts(2,2): warning TS6133: 'x' is declared but never used.\n";
        let parsed = parse_output(output);
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0].code, "TS2304");
        assert_eq!(parsed[0].severity, Severity::Critical);
        assert_eq!(parsed[0].location, Some(Location::at("types.generated.ts", 3, 5)));

        assert_eq!(parsed[1].severity, Severity::High);
        assert!(parsed[1].message.ends_with("Some detail line."));

        assert_eq!(parsed[2].severity, Severity::Low);
    }

    #[test]
    fn test_disabled_checker_is_skipped() {
        let validator = CompilationValidator::new(CheckerConfig {
            enabled: false,
            ..CheckerConfig::default()
        });
        let diags = validator.validate(Path::new("."), &[]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.all()[0].code, codes::CHECKER_SKIPPED);
        assert!(!diags.has_critical());
    }

    #[test]
    fn test_missing_checker_is_unavailable() {
        let validator = CompilationValidator::new(CheckerConfig {
            command: vec!["typegate-no-such-checker-binary".to_string()],
            ..CheckerConfig::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let diags = validator.validate(dir.path(), &[]);
        assert_eq!(diags.with_code(codes::CHECKER_UNAVAILABLE).count(), 1);
        assert!(diags.has_critical());
    }

    #[test]
    fn test_empty_command_is_unavailable() {
        let validator = CompilationValidator::new(CheckerConfig {
            command: Vec::new(),
            ..CheckerConfig::default()
        });
        let diags = validator.validate(Path::new("."), &[]);
        assert_eq!(diags.with_code(codes::CHECKER_UNAVAILABLE).count(), 1);
    }

    #[cfg(unix)]
    fn shell(script: &str, timeout_secs: u64) -> CompilationValidator {
        CompilationValidator::new(CheckerConfig {
            enabled: true,
            command: vec!["sh".into(), "-c".into(), script.into(), "checker".into()],
            timeout_secs,
            extra_sources: Vec::new(),
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let diags = shell("exit 0", 10).validate(dir.path(), &[]);
        assert!(diags.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_reported_errors_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo \"types.generated.ts(1,14): error TS2304: Cannot find name 'Missing'.\"; exit 2";
        let diags = shell(script, 10).validate(dir.path(), &[]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.all()[0].code, "TS2304");
        assert!(diags.has_critical());
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_failure_is_crash() {
        let dir = tempfile::tempdir().unwrap();
        let diags = shell("echo boom >&2; exit 3", 10).validate(dir.path(), &[]);
        let crash: Vec<_> = diags.with_code(codes::CHECKER_CRASHED).collect();
        assert_eq!(crash.len(), 1);
        assert!(crash[0].message.contains("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_checker() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let diags = shell("exec sleep 30", 1).validate(dir.path(), &[]);
        assert_eq!(diags.with_code(codes::CHECKER_TIMEOUT).count(), 1);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[cfg(unix)]
    #[test]
    fn test_artifacts_are_passed_as_arguments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("types.generated.ts"), "export {};\n").unwrap();
        let artifact = EmittedArtifact {
            file_name: "types.generated.ts".to_string(),
            content: "export {};\n".to_string(),
            derived_from: Default::default(),
        };
        // Fails with diagnostics only when the file is missing from the working directory
        let script = "test -f \"$1\" || { echo \"x.ts(1,1): error TS2307: missing $1\"; exit 1; }";
        let diags = shell(script, 10).validate(dir.path(), &[artifact]);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_unlocated_errors_are_parsed() {
        let parsed = parse_output("error TS6053: File 'shims.d.ts' not found.\n  The file is in the program.\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].code, "TS6053");
        assert_eq!(parsed[0].severity, Severity::Critical);
        assert_eq!(parsed[0].location, None);
        assert!(parsed[0].message.ends_with("The file is in the program."));
    }

    #[cfg(unix)]
    #[test]
    fn test_extra_sources_resolve_against_source_root() {
        let checked = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("shims.d.ts"), "export {};\n").unwrap();

        let script = "for f in \"$@\"; do test -f \"$f\" || { echo \"error TS6053: File '$f' not found.\"; exit 1; }; done";
        let mut validator = shell(script, 10);
        validator.config.extra_sources = vec![PathBuf::from("shims.d.ts")];

        let diags = validator.validate(checked.path(), &[]);
        assert_eq!(diags.with_code("TS6053").count(), 1);
        assert_eq!(diags.with_code(codes::CHECKER_CRASHED).count(), 0);

        let diags = validator.with_source_root(root.path()).validate(checked.path(), &[]);
        assert!(diags.is_empty(), "{:?}", diags);
    }
}

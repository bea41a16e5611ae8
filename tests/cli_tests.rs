//! Command-line behavior of the `typegate` binary

use std::fs;
use std::path::Path;
use std::process::Command;

use typegate::{PipelineConfig, Strictness};

fn typegate(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_typegate"));
    cmd.current_dir(cwd).env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_write_config_saves_effective_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("typegate.toml");

    let status = typegate(dir.path())
        .args(["--schema", "api/openapi.json", "--permissive", "--no-check", "--write-config"])
        .arg(&path)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let saved = PipelineConfig::load_from(path.to_str()).unwrap();
    assert_eq!(saved.pipeline.schema, Path::new("api/openapi.json"));
    assert_eq!(saved.pipeline.mode, Strictness::Permissive);
    assert!(!saved.checker.enabled);
    // nothing ran
    assert!(!dir.path().join("generated").exists());
}

#[test]
fn test_strict_drift_exits_with_validation_failure() {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let dir = tempfile::tempdir().unwrap();
    fs::copy(fixtures.join("forecast.json"), dir.path().join("openapi.json")).unwrap();
    fs::create_dir_all(dir.path().join("contracts")).unwrap();
    fs::copy(
        fixtures.join("contracts_drift").join("forecast.json"),
        dir.path().join("contracts").join("forecast.json"),
    )
    .unwrap();

    let output = typegate(dir.path())
        .args(["--contracts", "contracts", "--strict", "--no-check"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(dir.path().join("generated").join("types.generated.ts").exists());
    assert!(dir.path().join("reports").join("report.json").exists());

    let permissive = typegate(dir.path())
        .args(["--contracts", "contracts", "--permissive", "--no-check"])
        .output()
        .unwrap();
    assert_eq!(permissive.status.code(), Some(0));
}

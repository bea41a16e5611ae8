//! Golden tests for emitted TypeScript
//!
//! The emitted artifacts for `fixtures/stations.json` are pinned under
//! `golden/`; the schema fingerprint in the header is masked.

use std::fs;
use std::path::Path;
use std::process::Command;

use typegate::codegen::{write_artifacts, EmitOptions};
use typegate::{CheckerConfig, CompilationValidator, EmittedArtifact, SchemaLoader, TypeEmitter};

fn tests_path() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").leak()
}

fn emit(fixture: &str) -> Vec<EmittedArtifact> {
    let bytes = fs::read(tests_path().join("fixtures").join(fixture)).unwrap();
    let (fingerprint, doc) = SchemaLoader::parse(&bytes, fixture).unwrap();
    let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fingerprint).unwrap();
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    out.artifacts
        .into_iter()
        .map(|mut artifact| {
            artifact.content = artifact.content.replace(fingerprint.as_str(), "<fingerprint>");
            artifact
        })
        .collect()
}

fn golden(name: &str) -> String {
    fs::read_to_string(tests_path().join("golden").join(name)).unwrap()
}

// =============================================================================
// Emitted text
// =============================================================================

#[test]
fn test_stations_types_match_golden() {
    let artifacts = emit("stations.json");
    assert_eq!(artifacts[0].file_name, "types.generated.ts");
    assert_eq!(artifacts[0].content, golden("stations.types.generated.ts"));
}

#[test]
fn test_stations_utils_match_golden() {
    let artifacts = emit("stations.json");
    assert_eq!(artifacts[1].file_name, "utils.generated.ts");
    assert_eq!(artifacts[1].content, golden("stations.utils.generated.ts"));
}

// =============================================================================
// Real checker
// =============================================================================

fn tsc_available() -> bool {
    Command::new("tsc")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Runs only where a TypeScript compiler is on PATH
#[test]
fn test_emitted_code_passes_default_checker() {
    if !tsc_available() {
        eprintln!("tsc not found on PATH; skipping");
        return;
    }

    for fixture in ["forecast.json", "stations.json"] {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = emit(fixture);
        write_artifacts(dir.path(), &artifacts, &[]).unwrap();

        let diagnostics = CompilationValidator::new(CheckerConfig::default()).validate(dir.path(), &artifacts);
        assert!(diagnostics.is_empty(), "{}: {:?}", fixture, diagnostics);
    }
}

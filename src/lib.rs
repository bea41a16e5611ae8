//! typegate
//!
//! Schema-driven TypeScript binding generation with compile checks and
//! contract drift validation.
//!
//! ## Features
//!
//! - **Incremental**: SHA-256 fingerprints skip regeneration when the schema is unchanged
//! - **Graceful Degradation**: Unsupported constructs become permissive types with warnings
//! - **Compile Checks**: Generated bindings are verified with the static checker
//! - **Contract Validation**: Recorded interactions are checked against the schema structurally
//! - **Graded Reports**: JSON and Markdown reports with remediation hints
//!
//! ## Architecture
//!
//! ```text
//! schema ──► change ──► codegen ──► compiler ──► compatibility ──► report
//!   │          │                                      ▲
//!   │        state                                contracts
//!   └──────────────────────── pipeline ──────────────────────────────┘
//! ```

pub mod change;
pub mod checksum;
pub mod codegen;
pub mod compatibility;
pub mod compiler;
pub mod config;
pub mod contracts;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod state;

pub use change::{ChangeDecision, ChangeDetector, ChangeReason};
pub use checksum::Fingerprint;
pub use codegen::{EmittedArtifact, TypeEmitter};
pub use compatibility::{CompatibilityFinding, ContractCompatibilityChecker, Strictness};
pub use compiler::{CheckerConfig, CompilationValidator};
pub use config::PipelineConfig;
pub use diagnostics::{Diagnostics, Severity, ValidationDiagnostic};
pub use error::{PipelineError, Result};
pub use pipeline::{CancellationToken, Pipeline, PipelineRun, RunStatus};
pub use report::{Outcome, ReportGenerator};
pub use schema::{SchemaDocument, SchemaLoader};
pub use state::{FileStateStore, RunStateStore};

//! Change detection
//!
//! Decides whether artifacts must be regenerated. The policy never skips a
//! run that could produce different results: when in doubt, regenerate.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::Fingerprint;
use crate::state::{PersistedRunState, RunOutcome};

/// Why regeneration is (or is not) needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    NoPriorRecord,
    Forced,
    FingerprintChanged,
    PriorRunIncomplete,
    ArtifactMissing,
    ContractsChanged,
    ConfigChanged,
    Unchanged,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoPriorRecord => "no prior run recorded",
            Self::Forced => "regeneration forced",
            Self::FingerprintChanged => "schema fingerprint changed",
            Self::PriorRunIncomplete => "prior run did not succeed",
            Self::ArtifactMissing => "a previously emitted artifact is missing",
            Self::ContractsChanged => "contract fixtures changed",
            Self::ConfigChanged => "pipeline settings changed",
            Self::Unchanged => "schema unchanged",
        };
        f.write_str(s)
    }
}

/// Result of change detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDecision {
    pub needs_regeneration: bool,
    pub reason: ChangeReason,
}

impl ChangeDecision {
    fn regenerate(reason: ChangeReason) -> Self {
        Self {
            needs_regeneration: true,
            reason,
        }
    }
}

/// Inputs observed for the current run
#[derive(Debug, Clone, Copy)]
pub struct CurrentInputs<'a> {
    pub fingerprint: &'a Fingerprint,
    pub contracts_fingerprint: Option<&'a Fingerprint>,
    /// See [`crate::config::PipelineConfig::fingerprint`]
    pub config_fingerprint: Option<&'a Fingerprint>,
    /// Directory the prior artifacts should be in
    pub artifact_dir: &'a Path,
}

/// Compares current inputs with the prior run record
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn needs_regeneration(
        current: CurrentInputs<'_>,
        prior: Option<&PersistedRunState>,
        force: bool,
    ) -> ChangeDecision {
        if force {
            return ChangeDecision::regenerate(ChangeReason::Forced);
        }
        let Some(prior) = prior else {
            return ChangeDecision::regenerate(ChangeReason::NoPriorRecord);
        };
        if prior.fingerprint.as_str().as_bytes() != current.fingerprint.as_str().as_bytes() {
            return ChangeDecision::regenerate(ChangeReason::FingerprintChanged);
        }
        if prior.outcome != RunOutcome::Success {
            return ChangeDecision::regenerate(ChangeReason::PriorRunIncomplete);
        }
        if prior
            .artifacts
            .iter()
            .any(|name| !current.artifact_dir.join(name).is_file())
        {
            return ChangeDecision::regenerate(ChangeReason::ArtifactMissing);
        }
        if prior.contracts_fingerprint.as_ref() != current.contracts_fingerprint {
            return ChangeDecision::regenerate(ChangeReason::ContractsChanged);
        }
        if prior.config_fingerprint.as_ref() != current.config_fingerprint {
            return ChangeDecision::regenerate(ChangeReason::ConfigChanged);
        }
        ChangeDecision {
            needs_regeneration: false,
            reason: ChangeReason::Unchanged,
        }
    }
}

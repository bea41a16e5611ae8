//! Configuration management for typegate
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (typegate.toml)
//! - Environment variables (TYPEGATE__SECTION__KEY)
//! - Command-line overrides
//!
//! ## Example config file (typegate.toml):
//! ```toml
//! [pipeline]
//! schema = "api/openapi.json"
//! out_dir = "web/src/generated"
//! mode = "strict"
//!
//! [checker]
//! command = ["npx", "tsc", "--noEmit", "--pretty", "false", "--strict", "--target", "es2020"]
//! timeout_secs = 120
//!
//! [contracts]
//! dir = "contracts"
//!
//! [contracts.routes]
//! "/api/forecast" = "ForecastResponse"
//! "/api/stations" = "Station[]"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::checksum::Fingerprint;
use crate::codegen::EmitOptions;
use crate::compatibility::Strictness;
use crate::compiler::CheckerConfig;

/// Main configuration for a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Inputs, outputs and run mode
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Artifact naming
    #[serde(default)]
    pub emit: EmitOptions,

    /// Static checker invocation
    #[serde(default)]
    pub checker: CheckerConfig,

    /// Contract fixtures and routing
    #[serde(default)]
    pub contracts: ContractsConfig,
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Interface schema document
    #[serde(default = "default_schema")]
    pub schema: PathBuf,

    /// Directory receiving the generated artifacts
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Directory receiving report.json and report.md
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Persisted run state (a `.lock` sibling is created next to it)
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default)]
    pub mode: Strictness,

    /// Validate without writing artifacts or state
    #[serde(default)]
    pub dry_run: bool,

    /// Regenerate even when the schema is unchanged
    #[serde(default)]
    pub force: bool,

    /// CI mode: forced regeneration, JSON logs
    #[serde(default)]
    pub ci: bool,
}

/// Contract fixture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Directory of recorded interactions; contract checking is skipped when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Seed the route table from the schema's operation responses
    #[serde(default = "default_true")]
    pub derive_routes_from_schema: bool,

    /// Explicit path prefix to entity mapping (`Name[]` for list responses)
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

// Default value functions
fn default_schema() -> PathBuf {
    PathBuf::from("openapi.json")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".typegate/state.json")
}

fn default_true() -> bool {
    true
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            out_dir: default_out_dir(),
            report_dir: default_report_dir(),
            state_file: default_state_file(),
            mode: Strictness::default(),
            dry_run: false,
            force: false,
            ci: false,
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            derive_routes_from_schema: true,
            routes: BTreeMap::new(),
        }
    }
}

/// Values given on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub schema: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub contracts_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub mode: Option<Strictness>,
    pub dry_run: bool,
    pub force: bool,
    pub ci: bool,
    pub no_check: bool,
}

impl PipelineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["typegate.toml", ".typegate.toml", "config/typegate.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "typegate", "typegate") {
            let xdg_config = config_dir.config_dir().join("typegate.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (TYPEGATE__PIPELINE__MODE=permissive)
        builder = builder.add_source(
            Environment::with_prefix("TYPEGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Apply command-line overrides on top of loaded values
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let settings = &mut self.pipeline;
        if let Some(schema) = overrides.schema {
            settings.schema = schema;
        }
        if let Some(out_dir) = overrides.out_dir {
            settings.out_dir = out_dir;
        }
        if let Some(report_dir) = overrides.report_dir {
            settings.report_dir = report_dir;
        }
        if let Some(state_file) = overrides.state_file {
            settings.state_file = state_file;
        }
        if let Some(mode) = overrides.mode {
            settings.mode = mode;
        }
        settings.dry_run |= overrides.dry_run;
        settings.force |= overrides.force;
        settings.ci |= overrides.ci;

        if let Some(dir) = overrides.contracts_dir {
            self.contracts.dir = Some(dir);
        }
        if overrides.no_check {
            self.checker.enabled = false;
        }
    }

    /// Digest of the settings that shape a run's artifacts or its verdict.
    ///
    /// Paths and the force, ci and dry-run switches are left out: a moved
    /// schema or output directory is caught as a schema or artifact change.
    pub fn fingerprint(&self) -> Fingerprint {
        let mode = serde_json::to_vec(&self.pipeline.mode).unwrap_or_default();
        let emit = serde_json::to_vec(&self.emit).unwrap_or_default();
        let checker = serde_json::to_vec(&self.checker).unwrap_or_default();
        let routes = serde_json::to_vec(&(
            self.contracts.derive_routes_from_schema,
            &self.contracts.routes,
        ))
        .unwrap_or_default();
        Fingerprint::from_parts([
            ("checker", checker.as_slice()),
            ("emit", emit.as_slice()),
            ("mode", mode.as_slice()),
            ("routes", routes.as_slice()),
        ])
    }

    /// Whether change detection may be bypassed
    pub fn forces_regeneration(&self) -> bool {
        self.pipeline.force || self.pipeline.ci
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.pipeline.mode, Strictness::Strict);
        assert!(config.checker.enabled);
        assert_eq!(config.checker.timeout_secs, 120);
        assert_eq!(config.emit.types_file, "types.generated.ts");
        assert!(config.contracts.derive_routes_from_schema);
        assert!(!config.forces_regeneration());
    }

    #[test]
    fn test_serialize_config() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("[checker]"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[pipeline]
schema = "api/openapi.json"
mode = "permissive"

[checker]
enabled = false

[contracts]
dir = "contracts"

[contracts.routes]
"/api/forecast" = "ForecastResponse"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.pipeline.schema, PathBuf::from("api/openapi.json"));
        assert_eq!(config.pipeline.mode, Strictness::Permissive);
        assert!(!config.checker.enabled);
        assert_eq!(config.checker.timeout_secs, 120);
        assert_eq!(config.contracts.dir, Some(PathBuf::from("contracts")));
        assert_eq!(
            config.contracts.routes.get("/api/forecast").map(String::as_str),
            Some("ForecastResponse")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(PipelineConfig::load_from(Some("/nonexistent/typegate-config.toml")).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("typegate.toml");
        let mut config = PipelineConfig::default();
        config.contracts.routes.insert("/a".into(), "A[]".into());
        config.save(&path).unwrap();

        let reloaded = PipelineConfig::load_from(path.to_str()).unwrap();
        assert_eq!(reloaded.contracts.routes, config.contracts.routes);
    }

    #[test]
    fn test_fingerprint_tracks_output_shaping_settings() {
        let base = PipelineConfig::default();
        let fp = base.fingerprint();
        assert_eq!(fp, PipelineConfig::default().fingerprint());

        let mut forced = base.clone();
        forced.pipeline.force = true;
        forced.pipeline.ci = true;
        forced.pipeline.out_dir = "elsewhere".into();
        assert_eq!(forced.fingerprint(), fp);

        let mut permissive = base.clone();
        permissive.pipeline.mode = Strictness::Permissive;
        assert_ne!(permissive.fingerprint(), fp);

        let mut routed = base.clone();
        routed.contracts.routes.insert("/a".into(), "A".into());
        assert_ne!(routed.fingerprint(), fp);

        let mut unchecked = base;
        unchecked.checker.enabled = false;
        assert_ne!(unchecked.fingerprint(), fp);
    }

    #[test]
    fn test_overrides() {
        let mut config = PipelineConfig::default();
        config.apply(ConfigOverrides {
            schema: Some("other.json".into()),
            mode: Some(Strictness::Permissive),
            contracts_dir: Some("fixtures".into()),
            ci: true,
            no_check: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.pipeline.schema, PathBuf::from("other.json"));
        assert_eq!(config.pipeline.mode, Strictness::Permissive);
        assert_eq!(config.contracts.dir, Some(PathBuf::from("fixtures")));
        assert!(!config.checker.enabled);
        assert!(config.forces_regeneration());
        assert_eq!(config.pipeline.out_dir, default_out_dir());
    }
}

//! Resolve OpenAI-style model names to Anthropic model identifiers.
//!
//! Resolution walks a fixed precedence chain and stops at the first hit:
//!
//! 1. an exact entry in the operator's custom mappings,
//! 2. the process-wide default model override,
//! 3. pattern-based tier classification of the lower-cased name,
//!    mapped to an identifier through [`TierModels`].
//!
//! The chain is total: every input lands in some tier.

use crate::config::{MappingsConfig, ReloadMode, TierModels};
use crate::error::{ProxyError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exact-match inbound → outbound model overrides.
pub type CustomMappings = HashMap<String, String>;

const HIGH_TIER_MARKERS: &[&str] = &["-pro", "-max", "-ultra"];
const LOW_TIER_MARKERS: &[&str] = &["-nano", "gpt-3.5", "gpt-3"];

// o1, o3, o4, o17... anchored at the start of the name.
static O_SERIES_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^o\d+").unwrap());

/// Coarse cost/capability class of a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Default,
    Low,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

impl TierModels {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::High => &self.high,
            Tier::Default => &self.default,
            Tier::Low => &self.low,
        }
    }
}

/// Which step of the precedence chain produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingReason {
    CustomMapping,
    EnvironmentOverride,
    HighTierPattern,
    HighTierOSeries,
    LowTierPattern,
    DefaultPattern,
}

impl MappingReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::CustomMapping => "custom mapping",
            Self::EnvironmentOverride => "environment variable override",
            Self::HighTierPattern => "high-tier pattern match",
            Self::HighTierOSeries => "high-tier o-series match",
            Self::LowTierPattern => "low-tier pattern match",
            Self::DefaultPattern => "default pattern",
        }
    }

    /// The tier this reason implies, or `None` for the override steps.
    pub fn tier(self) -> Option<Tier> {
        match self {
            Self::CustomMapping | Self::EnvironmentOverride => None,
            Self::HighTierPattern | Self::HighTierOSeries => Some(Tier::High),
            Self::LowTierPattern => Some(Tier::Low),
            Self::DefaultPattern => Some(Tier::Default),
        }
    }
}

impl fmt::Display for MappingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The outcome of one pass through the precedence chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub model: String,
    pub reason: MappingReason,
}

/// Classify a model name by pattern alone (step 3 of the chain).
///
/// Matching is case-insensitive. Substring checks are unanchored; only the
/// o-series rule is anchored at the start, and it excludes `-mini` variants.
pub fn classify(model_name: &str) -> MappingReason {
    let model = model_name.to_lowercase();

    if HIGH_TIER_MARKERS.iter().any(|m| model.contains(m)) {
        return MappingReason::HighTierPattern;
    }

    if O_SERIES_REGEX.is_match(&model) && !model.contains("-mini") {
        return MappingReason::HighTierOSeries;
    }

    // A leading "nano" segment counts as the "-nano" marker.
    let leading_nano = model == "nano" || model.starts_with("nano-");
    if leading_nano || LOW_TIER_MARKERS.iter().any(|m| model.contains(m)) {
        return MappingReason::LowTierPattern;
    }

    MappingReason::DefaultPattern
}

/// A read-only provider of custom mappings.
pub trait MappingSource: Send + Sync {
    /// Load the current mappings. Errors are recovered by the caller.
    fn load(&self) -> Result<CustomMappings>;

    /// Short description for logs and the mappings endpoint.
    fn describe(&self) -> String;
}

/// Mappings read from a JSON object file on every call.
///
/// A missing file is an empty set, not an error.
#[derive(Debug, Clone)]
pub struct JsonFileMappings {
    path: PathBuf,
}

impl JsonFileMappings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingSource for JsonFileMappings {
    fn load(&self) -> Result<CustomMappings> {
        if !self.path.exists() {
            return Ok(CustomMappings::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ProxyError::mappings(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            ProxyError::mappings(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An immutable in-memory snapshot of mappings.
#[derive(Debug, Clone, Default)]
pub struct StaticMappings {
    mappings: CustomMappings,
}

impl StaticMappings {
    pub fn new(mappings: CustomMappings) -> Self {
        Self { mappings }
    }
}

impl MappingSource for StaticMappings {
    fn load(&self) -> Result<CustomMappings> {
        Ok(self.mappings.clone())
    }

    fn describe(&self) -> String {
        format!("snapshot ({} entries)", self.mappings.len())
    }
}

/// Resolves inbound model names against injected configuration.
#[derive(Clone)]
pub struct ModelMapper {
    source: Arc<dyn MappingSource>,
    default_override: Option<String>,
    tiers: TierModels,
}

impl fmt::Debug for ModelMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMapper")
            .field("source", &self.source.describe())
            .field("default_override", &self.default_override)
            .field("tiers", &self.tiers)
            .finish()
    }
}

impl ModelMapper {
    /// An empty override string is treated as no override.
    pub fn new(
        source: Arc<dyn MappingSource>,
        default_override: Option<String>,
        tiers: TierModels,
    ) -> Self {
        Self {
            source,
            default_override: default_override.filter(|m| !m.is_empty()),
            tiers,
        }
    }

    /// Build a mapper from the `[mappings]` config section.
    ///
    /// In [`ReloadMode::Startup`] the file is read once here; a broken file
    /// yields an empty snapshot for the life of the process.
    pub fn from_config(
        mappings: &MappingsConfig,
        tiers: TierModels,
        default_override: Option<String>,
    ) -> Self {
        let file = JsonFileMappings::new(&mappings.file);
        let source: Arc<dyn MappingSource> = match mappings.reload {
            ReloadMode::PerRequest => Arc::new(file),
            ReloadMode::Startup => Arc::new(StaticMappings::new(load_or_empty(&file))),
        };
        Self::new(source, default_override, tiers)
    }

    pub fn tiers(&self) -> &TierModels {
        &self.tiers
    }

    pub fn default_override(&self) -> Option<&str> {
        self.default_override.as_deref()
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Current custom mappings, empty if the source cannot be read.
    pub fn custom_mappings(&self) -> CustomMappings {
        load_or_empty(self.source.as_ref())
    }

    /// Walk the precedence chain once, reading the mappings source once.
    pub fn resolve_with_reason(&self, inbound: &str) -> Resolution {
        let custom = self.custom_mappings();
        if let Some(mapped) = custom.get(inbound).filter(|m| !m.is_empty()) {
            return Resolution {
                model: mapped.clone(),
                reason: MappingReason::CustomMapping,
            };
        }

        if let Some(ref model) = self.default_override {
            return Resolution {
                model: model.clone(),
                reason: MappingReason::EnvironmentOverride,
            };
        }

        let reason = classify(inbound);
        let tier = reason.tier().unwrap_or(Tier::Default);
        Resolution {
            model: self.tiers.model_for(tier).to_string(),
            reason,
        }
    }

    pub fn resolve(&self, inbound: &str) -> String {
        self.resolve_with_reason(inbound).model
    }

    pub fn explain(&self, inbound: &str) -> MappingReason {
        self.resolve_with_reason(inbound).reason
    }
}

fn load_or_empty(source: &dyn MappingSource) -> CustomMappings {
    source.load().unwrap_or_else(|e| {
        tracing::warn!(source = %source.describe(), error = %e, "Ignoring custom model mappings");
        CustomMappings::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn mapper(custom: &[(&str, &str)], default_override: Option<&str>) -> ModelMapper {
        let mappings = custom
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ModelMapper::new(
            Arc::new(StaticMappings::new(mappings)),
            default_override.map(String::from),
            TierModels::default(),
        )
    }

    #[test]
    fn test_default_tier_models() {
        let m = mapper(&[], None);
        for name in ["gpt-4", "gpt-5.2", "gpt-4-turbo", "gpt-4o", "o1-mini", "gpt-5-mini"] {
            assert_eq!(m.resolve(name), "claude-sonnet-4-5", "{name}");
            assert_eq!(m.explain(name), MappingReason::DefaultPattern, "{name}");
        }
    }

    #[test]
    fn test_high_tier_suffixes() {
        let m = mapper(&[], None);
        for name in ["gpt-5.2-pro", "gpt-4-max", "model-ultra", "GPT-5-PRO"] {
            assert_eq!(m.resolve(name), "claude-opus-4-5", "{name}");
            assert_eq!(m.explain(name), MappingReason::HighTierPattern, "{name}");
        }
    }

    #[test]
    fn test_o_series_is_high_tier() {
        let m = mapper(&[], None);
        for name in ["o1", "o3", "o4", "o17", "O3", "o1-preview", "o3-2025-04-16"] {
            assert_eq!(m.resolve(name), "claude-opus-4-5", "{name}");
            assert_eq!(m.explain(name), MappingReason::HighTierOSeries, "{name}");
        }
    }

    #[test]
    fn test_o_series_mini_falls_through() {
        let m = mapper(&[], None);
        assert_eq!(m.explain("o1-mini"), MappingReason::DefaultPattern);
        assert_eq!(m.explain("o4-mini"), MappingReason::DefaultPattern);
        // A -mini o-series name can still land in the low tier by pattern.
        assert_eq!(m.explain("o3-mini-nano"), MappingReason::LowTierPattern);
    }

    #[test]
    fn test_o_series_is_anchored() {
        assert_eq!(classify("gpt-o3"), MappingReason::DefaultPattern);
        assert_eq!(classify("omni"), MappingReason::DefaultPattern);
        assert_eq!(classify("o"), MappingReason::DefaultPattern);
    }

    #[test]
    fn test_low_tier_patterns() {
        let m = mapper(&[], None);
        for name in ["gpt-3.5-turbo", "gpt-3", "gpt-4.1-nano", "nano-x", "GPT-3.5-TURBO-16K"] {
            assert_eq!(m.resolve(name), "claude-haiku-4-5", "{name}");
            assert_eq!(m.explain(name), MappingReason::LowTierPattern, "{name}");
        }
    }

    #[test]
    fn test_leading_nano_must_be_a_whole_segment() {
        assert_eq!(classify("nano"), MappingReason::LowTierPattern);
        assert_eq!(classify("Nano-Large"), MappingReason::LowTierPattern);
        assert_eq!(classify("nanobot-7b"), MappingReason::DefaultPattern);
        assert_eq!(classify("nanogpt"), MappingReason::DefaultPattern);
    }

    #[test]
    fn test_high_suffix_beats_low_pattern() {
        assert_eq!(classify("gpt-3.5-pro"), MappingReason::HighTierPattern);
        assert_eq!(classify("gpt-5-nano-max"), MappingReason::HighTierPattern);
    }

    #[test]
    fn test_unexpected_input_is_default() {
        let m = mapper(&[], None);
        for name in ["", "   ", "🤖", "claude-opus-4-5"] {
            assert_eq!(m.resolve(name), "claude-sonnet-4-5", "{name:?}");
        }
    }

    #[test]
    fn test_custom_mapping_wins() {
        let m = mapper(
            &[("o3", "claude-sonnet-4-5"), ("gpt-3.5-turbo", "claude-opus-4-5")],
            Some("claude-haiku-4-5"),
        );
        assert_eq!(m.resolve("o3"), "claude-sonnet-4-5");
        assert_eq!(m.explain("o3"), MappingReason::CustomMapping);
        assert_eq!(m.resolve("gpt-3.5-turbo"), "claude-opus-4-5");
    }

    #[test]
    fn test_custom_mapping_is_case_sensitive() {
        let m = mapper(&[("gpt-4", "custom-target")], None);
        assert_eq!(m.resolve("gpt-4"), "custom-target");
        assert_eq!(m.resolve("GPT-4"), "claude-sonnet-4-5");
    }

    #[test]
    fn test_empty_custom_value_is_ignored() {
        let m = mapper(&[("gpt-4", "")], None);
        assert_eq!(m.resolve("gpt-4"), "claude-sonnet-4-5");
        assert_eq!(m.explain("gpt-4"), MappingReason::DefaultPattern);
    }

    #[test]
    fn test_override_applies_to_every_unmapped_model() {
        let m = mapper(&[], Some("claude-opus-4-1"));
        for name in ["gpt-4", "o3", "gpt-5.2-pro", "gpt-3.5-turbo", "anything"] {
            assert_eq!(m.resolve(name), "claude-opus-4-1", "{name}");
            assert_eq!(m.explain(name), MappingReason::EnvironmentOverride, "{name}");
        }
    }

    #[test]
    fn test_empty_override_is_unset() {
        let m = mapper(&[], Some(""));
        assert_eq!(m.default_override(), None);
        assert_eq!(m.explain("o3"), MappingReason::HighTierOSeries);
    }

    #[test]
    fn test_explain_matches_resolve() {
        let m = mapper(&[("gpt-4", "claude-opus-4-5")], None);
        let tiers = TierModels::default();
        for name in [
            "gpt-4", "gpt-5.2", "gpt-4-turbo", "gpt-5.2-pro", "o3", "o1", "o1-mini",
            "gpt-3.5-turbo", "nano-x",
        ] {
            let reason = m.explain(name);
            let model = m.resolve(name);
            match reason.tier() {
                Some(tier) => assert_eq!(model, tiers.model_for(tier), "{name}"),
                None => assert_eq!(reason, MappingReason::CustomMapping, "{name}"),
            }
        }
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(MappingReason::CustomMapping.to_string(), "custom mapping");
        assert_eq!(
            MappingReason::EnvironmentOverride.to_string(),
            "environment variable override"
        );
        assert_eq!(MappingReason::HighTierPattern.label(), "high-tier pattern match");
        assert_eq!(MappingReason::HighTierOSeries.label(), "high-tier o-series match");
        assert_eq!(MappingReason::LowTierPattern.label(), "low-tier pattern match");
        assert_eq!(MappingReason::DefaultPattern.label(), "default pattern");
    }

    #[test]
    fn test_json_file_mappings_are_read_each_call() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"gpt-4": "claude-opus-4-5"}}"#).unwrap();
        f.flush().unwrap();

        let m = ModelMapper::new(
            Arc::new(JsonFileMappings::new(f.path())),
            None,
            TierModels::default(),
        );
        assert_eq!(m.resolve("gpt-4"), "claude-opus-4-5");

        std::fs::write(f.path(), r#"{"gpt-4": "claude-haiku-4-5"}"#).unwrap();
        assert_eq!(m.resolve("gpt-4"), "claude-haiku-4-5");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileMappings::new(dir.path().join(".router-mappings.json"));
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_falls_through_to_override() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        f.flush().unwrap();

        let source = JsonFileMappings::new(f.path());
        assert!(matches!(source.load(), Err(ProxyError::Mappings { .. })));

        let m = ModelMapper::new(
            Arc::new(source),
            Some("claude-opus-4-5".into()),
            TierModels::default(),
        );
        assert_eq!(m.explain("gpt-4"), MappingReason::EnvironmentOverride);
        assert!(m.custom_mappings().is_empty());
    }

    #[test]
    fn test_non_string_values_are_malformed() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"gpt-4": 42}}"#).unwrap();
        f.flush().unwrap();

        let m = ModelMapper::new(
            Arc::new(JsonFileMappings::new(f.path())),
            None,
            TierModels::default(),
        );
        assert_eq!(m.resolve("gpt-4"), "claude-sonnet-4-5");
    }

    #[test]
    fn test_startup_reload_takes_a_snapshot() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"gpt-4": "claude-opus-4-5"}}"#).unwrap();
        f.flush().unwrap();

        let config = MappingsConfig {
            file: f.path().to_path_buf(),
            reload: ReloadMode::Startup,
            override_env: "UNUSED".to_string(),
        };
        let m = ModelMapper::from_config(&config, TierModels::default(), None);

        std::fs::write(f.path(), "{}").unwrap();
        assert_eq!(m.resolve("gpt-4"), "claude-opus-4-5");
    }

    #[test]
    fn test_custom_tier_models() {
        let tiers = TierModels {
            high: "premium".to_string(),
            default: "mid".to_string(),
            low: "economy".to_string(),
        };
        let m = ModelMapper::new(Arc::new(StaticMappings::default()), None, tiers);
        assert_eq!(m.resolve("o3"), "premium");
        assert_eq!(m.resolve("gpt-4"), "mid");
        assert_eq!(m.resolve("gpt-3.5-turbo"), "economy");
    }
}

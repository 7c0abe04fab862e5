use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::debug;

pub const TARGET_ROOT_OR_DIR: &str = "TARGET_ROOT_OR_DIR";
pub const COMMENT_ENABLED: &str = "COMMENT_ENABLED";
pub const RUN_VALIDATION: &str = "RUN_VALIDATION";
pub const RUN_REPORT: &str = "RUN_REPORT";

/// Where named inputs come from. Production reads the process environment;
/// tests hand in a map.
pub trait InputSource {
    fn get(&self, name: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl InputSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl InputSource for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

impl InputSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Looks up `name` and drops values that are blank after trimming.
pub(crate) fn non_empty(source: &dyn InputSource, name: &str) -> Option<String> {
    source
        .get(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
    Unrecognized,
}

impl Toggle {
    fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Toggle::Unrecognized;
        };
        let raw = raw.trim();
        if raw == "1" || raw.eq_ignore_ascii_case("true") {
            Toggle::On
        } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
            Toggle::Off
        } else {
            Toggle::Unrecognized
        }
    }

    fn or(self, default: bool) -> bool {
        match self {
            Toggle::On => true,
            Toggle::Off => false,
            Toggle::Unrecognized => default,
        }
    }
}

fn flag(source: &dyn InputSource, name: &str, default: bool) -> bool {
    let raw = source.get(name);
    let toggle = Toggle::parse(raw.as_deref());
    if raw.is_some() && toggle == Toggle::Unrecognized {
        debug!(target: "waf_gate.inputs", input = name, default, "unrecognized flag value, using default");
    }
    toggle.or(default)
}

/// Root handed to the tools. `Default` means no `--root` flag at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum TargetRoot {
    Default,
    Path(String),
}

impl TargetRoot {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some(".") => TargetRoot::Default,
            Some(path) => TargetRoot::Path(path.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetRoot::Default => ".",
            TargetRoot::Path(path) => path,
        }
    }
}

impl fmt::Display for TargetRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action inputs for one invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub target: TargetRoot,
    pub comment_enabled: bool,
    pub validation_enabled: bool,
    pub report_enabled: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: TargetRoot::Default,
            comment_enabled: true,
            validation_enabled: true,
            report_enabled: false,
        }
    }
}

impl RunConfig {
    /// Never fails: anything unrecognized falls back to the default.
    pub fn resolve(source: &dyn InputSource) -> Self {
        let defaults = Self::default();
        let config = Self {
            target: TargetRoot::parse(source.get(TARGET_ROOT_OR_DIR).as_deref()),
            comment_enabled: flag(source, COMMENT_ENABLED, defaults.comment_enabled),
            validation_enabled: flag(source, RUN_VALIDATION, defaults.validation_enabled),
            report_enabled: flag(source, RUN_REPORT, defaults.report_enabled),
        };
        debug!(target: "waf_gate.inputs", ?config, "resolved run config");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn toggle_accepts_documented_spellings() {
        for raw in ["1", "true", "TRUE", " True "] {
            assert_eq!(Toggle::parse(Some(raw)), Toggle::On, "{raw:?}");
        }
        for raw in ["0", "false", "False"] {
            assert_eq!(Toggle::parse(Some(raw)), Toggle::Off, "{raw:?}");
        }
        for raw in ["", "yes", "no", "2", "on"] {
            assert_eq!(Toggle::parse(Some(raw)), Toggle::Unrecognized, "{raw:?}");
        }
        assert_eq!(Toggle::parse(None), Toggle::Unrecognized);
    }

    #[test]
    fn empty_or_dot_target_uses_default_root() {
        assert_eq!(TargetRoot::parse(None), TargetRoot::Default);
        assert_eq!(TargetRoot::parse(Some("")), TargetRoot::Default);
        assert_eq!(TargetRoot::parse(Some(".")), TargetRoot::Default);
        assert_eq!(TargetRoot::parse(Some("  . ")), TargetRoot::Default);
        assert_eq!(
            TargetRoot::parse(Some("configs/")),
            TargetRoot::Path("configs/".into())
        );
        assert_eq!(TargetRoot::parse(Some("WAF")).as_str(), "WAF");
        assert_eq!(TargetRoot::Default.to_string(), ".");
    }

    #[test]
    fn missing_inputs_resolve_to_defaults() {
        let config = RunConfig::resolve(&source(&[]));
        assert_eq!(config, RunConfig::default());
        assert!(config.comment_enabled);
        assert!(config.validation_enabled);
        assert!(!config.report_enabled);
    }

    #[test]
    fn explicit_inputs_override_defaults() {
        let config = RunConfig::resolve(&source(&[
            (TARGET_ROOT_OR_DIR, "policies"),
            (COMMENT_ENABLED, "false"),
            (RUN_VALIDATION, "0"),
            (RUN_REPORT, "true"),
        ]));
        assert_eq!(config.target, TargetRoot::Path("policies".into()));
        assert!(!config.comment_enabled);
        assert!(!config.validation_enabled);
        assert!(config.report_enabled);
    }

    #[test]
    fn garbage_flag_values_fall_back_silently() {
        let config = RunConfig::resolve(&source(&[
            (COMMENT_ENABLED, "maybe"),
            (RUN_REPORT, "enabled"),
        ]));
        assert!(config.comment_enabled);
        assert!(!config.report_enabled);
    }
}

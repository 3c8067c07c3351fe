//! Harness configuration and scenario documents
//!
//! A scenario can be described declaratively in TOML or JSON:
//!
//! ```toml
//! name = "smoke"
//! blocking = true
//!
//! [harness]
//! default_time_limit_ms = 5000
//!
//! [[entries]]
//! kind = "test_case"
//! name = "login"
//! exec = "./login --fast"
//!
//! [[entries]]
//! kind = "group"
//! blocking = false
//! entries = [
//!     { kind = "test_case", exec = "./probe a" },
//!     { kind = "reference", target = "login" },
//! ]
//! ```

use crate::error::{ConfigError, ScenarioError};
use crate::handle::Harness;
use crate::identity::NodeId;
use crate::types::NodeHandle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PROFILE_CAPACITY: usize = 64;

/// Harness-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Time limit applied to test cases created without one (0 = unlimited)
    pub default_time_limit_ms: Option<u64>,
    /// Entries retained by the run profile log
    pub profile_capacity: usize,
    /// Concurrent process bound for the default launcher
    pub max_live_processes: Option<usize>,
    /// Pending deadline bound for the default scheduler
    pub max_pending_deadlines: Option<usize>,
    /// Terminate processes still running when a scenario is deleted
    pub kill_on_teardown: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_time_limit_ms: None,
            profile_capacity: DEFAULT_PROFILE_CAPACITY,
            max_live_processes: None,
            max_pending_deadlines: None,
            kill_on_teardown: true,
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn with_default_time_limit(mut self, limit: Duration) -> Self {
        self.default_time_limit_ms = Some(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_profile_capacity(mut self, capacity: usize) -> Self {
        self.profile_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_live_processes(mut self, max: usize) -> Self {
        self.max_live_processes = Some(max);
        self
    }

    #[must_use]
    pub fn with_max_pending_deadlines(mut self, max: usize) -> Self {
        self.max_pending_deadlines = Some(max);
        self
    }

    #[must_use]
    pub fn with_kill_on_teardown(mut self, kill: bool) -> Self {
        self.kill_on_teardown = kill;
        self
    }

    /// Default time limit as a duration; zero means unlimited
    pub fn default_time_limit(&self) -> Option<Duration> {
        self.default_time_limit_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

/// Declarative description of one scenario tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDocument {
    pub name: Option<String>,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default)]
    pub entries: Vec<EntryDocument>,
}

/// One child entry of a scenario or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryDocument {
    Group {
        name: Option<String>,
        #[serde(default = "default_blocking")]
        blocking: bool,
        #[serde(default)]
        entries: Vec<EntryDocument>,
    },
    TestCase {
        name: Option<String>,
        /// Display name when it should differ from the identifier
        display_name: Option<String>,
        exec: String,
        #[serde(default = "default_blocking")]
        blocking: bool,
        runs: Option<u32>,
        time_limit_ms: Option<u64>,
    },
    Reference {
        name: Option<String>,
        /// Name of the node to alias
        target: String,
    },
}

fn default_blocking() -> bool {
    true
}

impl ScenarioDocument {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Create the whole tree inside `harness` and return its root
    ///
    /// Nodes are created first and references applied afterwards, so a
    /// reference may name a node that appears later in the document.
    pub fn build(&self, harness: &mut Harness) -> Result<NodeHandle, ConfigError> {
        let root = harness.create_scenario(self.name.as_deref(), self.blocking);
        let mut references = Vec::new();

        if let Err(e) = build_entries(harness, root, &self.entries, &mut references) {
            discard(harness, root);
            return Err(e.into());
        }

        for (node, target) in references {
            if let Err(e) = harness.make_reference(node, NodeId::from_name(&target)) {
                tracing::warn!(target = %target, "reference rejected: {}", e);
                discard(harness, root);
                return Err(e.into());
            }
        }

        tracing::info!(scenario = %root.scenario(), nodes = self.count(), "scenario built from document");
        Ok(root)
    }

    /// Entries in the document, nested ones included
    pub fn count(&self) -> usize {
        fn walk(entries: &[EntryDocument]) -> usize {
            entries
                .iter()
                .map(|e| match e {
                    EntryDocument::Group { entries, .. } => 1 + walk(entries),
                    _ => 1,
                })
                .sum()
        }
        walk(&self.entries)
    }
}

fn build_entries(
    harness: &mut Harness,
    parent: NodeHandle,
    entries: &[EntryDocument],
    references: &mut Vec<(NodeHandle, String)>,
) -> Result<(), ScenarioError> {
    for entry in entries {
        match entry {
            EntryDocument::Group {
                name,
                blocking,
                entries,
            } => {
                let group = harness.add_group(parent, name.as_deref(), *blocking)?;
                build_entries(harness, group, entries, references)?;
            }
            EntryDocument::TestCase {
                name,
                display_name,
                exec,
                blocking,
                runs,
                time_limit_ms,
            } => {
                let tc = harness.add_test_case(parent, name.as_deref(), *blocking)?;
                harness.set_test_case_exec(tc, exec)?;
                if let Some(display) = display_name {
                    harness.set_test_case_name(tc, display)?;
                }
                if let Some(runs) = runs {
                    harness.set_number_of_runs(tc, *runs)?;
                }
                if let Some(ms) = time_limit_ms {
                    harness.set_max_time_limit(tc, Duration::from_millis(*ms))?;
                }
            }
            EntryDocument::Reference { name, target } => {
                let node = harness.add_test_case(parent, name.as_deref(), true)?;
                references.push((node, target.clone()));
            }
        }
    }
    Ok(())
}

fn discard(harness: &mut Harness, root: NodeHandle) {
    if let Err(e) = harness.delete_scenario(root) {
        tracing::warn!("failed to discard partial scenario: {}", e);
    }
}

/// Load a scenario document, choosing the format by file extension
pub fn load_document(path: impl AsRef<Path>) -> Result<ScenarioDocument, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => ScenarioDocument::from_toml_str(&content),
        Some("json") => ScenarioDocument::from_json_str(&content),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or_default().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SMOKE: &str = r#"
name = "smoke"

[harness]
default_time_limit_ms = 250
profile_capacity = 8

[[entries]]
kind = "test_case"
name = "login"
exec = "./login --fast"
runs = 3

[[entries]]
kind = "group"
name = "parallel"
blocking = false
entries = [
    { kind = "test_case", exec = "./probe a" },
    { kind = "reference", name = "again", target = "later" },
]

[[entries]]
kind = "test_case"
name = "later"
exec = "./later"
"#;

    #[test]
    fn test_config_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.profile_capacity, DEFAULT_PROFILE_CAPACITY);
        assert!(config.kill_on_teardown);
        assert_eq!(config.default_time_limit(), None);
    }

    #[test]
    fn test_zero_default_limit_is_unlimited() {
        let config = HarnessConfig::default().with_default_time_limit(Duration::ZERO);
        assert_eq!(config.default_time_limit(), None);
    }

    #[test]
    fn test_parse_toml_document() {
        let doc = ScenarioDocument::from_toml_str(SMOKE).unwrap();

        assert_eq!(doc.name.as_deref(), Some("smoke"));
        assert!(doc.blocking);
        assert_eq!(doc.harness.default_time_limit_ms, Some(250));
        assert_eq!(doc.harness.profile_capacity, 8);
        assert_eq!(doc.entries.len(), 3);
        assert_eq!(doc.count(), 5);
        assert!(matches!(
            &doc.entries[1],
            EntryDocument::Group { blocking: false, entries, .. } if entries.len() == 2
        ));
    }

    #[test]
    fn test_parse_json_document() {
        let doc = ScenarioDocument::from_json_str(
            r#"{"name":"j","entries":[{"kind":"test_case","exec":"true","time_limit_ms":10}]}"#,
        )
        .unwrap();
        assert_eq!(
            doc.entries,
            vec![EntryDocument::TestCase {
                name: None,
                display_name: None,
                exec: "true".to_string(),
                blocking: true,
                runs: None,
                time_limit_ms: Some(10),
            }]
        );
    }

    #[test]
    fn test_build_applies_forward_references() {
        let doc = ScenarioDocument::from_toml_str(SMOKE).unwrap();
        let mut harness = Harness::with_config(doc.harness.clone());

        let root = doc.build(&mut harness).unwrap();

        let again = harness.find_by_id(root, NodeId::from_name("again")).unwrap().unwrap();
        assert!(harness.refer_status(again).unwrap());
        assert_eq!(harness.test_case_exec(again).unwrap(), "./later");
        assert_eq!(harness.number_of_runs(harness.find_by_id(root, NodeId::from_name("login")).unwrap().unwrap()).unwrap(), 3);
        assert_eq!(harness.list_of_tci(root).unwrap().len(), 3);
    }

    #[test]
    fn test_build_discards_scenario_on_bad_reference() {
        let doc = ScenarioDocument::from_json_str(
            r#"{"entries":[{"kind":"reference","target":"nowhere"}]}"#,
        )
        .unwrap();
        let mut harness = Harness::new();

        let result = doc.build(&mut harness);

        assert!(matches!(
            result,
            Err(ConfigError::Scenario(ScenarioError::UnknownReference(_)))
        ));
        assert_eq!(harness.scenario_count(), 0);
    }

    #[test]
    fn test_load_document_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smoke.toml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(SMOKE.as_bytes())
            .unwrap();

        let doc = load_document(&path).unwrap();
        assert_eq!(doc.name.as_deref(), Some("smoke"));

        let yaml = dir.path().join("smoke.yaml");
        std::fs::write(&yaml, "name: smoke").unwrap();
        assert!(matches!(
            load_document(&yaml),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"
        ));

        assert!(matches!(
            load_document(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}

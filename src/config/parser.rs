//! Stack file parser.
//!
//! This module loads the stack file, applies environment overrides and reads
//! the templates it points at into a [`StackArtifact`].

use crate::cloud::Tag;
use crate::error::{ConfigError, DeployError, Result};
use crate::stack::{MetadataEntry, StackArtifact, parse_template_body};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackFile;

/// Overrides the stack name.
pub const STACK_NAME_ENV: &str = "HALLDYLL_STACK_NAME";

/// Control plane endpoint.
pub const ENDPOINT_ENV: &str = "HALLDYLL_ENDPOINT";

/// Control plane bearer token.
pub const API_TOKEN_ENV: &str = "HALLDYLL_API_TOKEN";

/// Parser for stack files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackFile> {
        let path = path.as_ref();
        info!("Loading stack file from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a stack file from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackFile> {
        let file: StackFile = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!("Parsed stack file for stack: {}", file.stack.name);
        Ok(file)
    }

    /// Loads a stack file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackFile> {
        let mut file = self.load_file(path)?;
        apply_overrides(&mut file, |name| std::env::var(name).ok());
        Ok(file)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the templates of `file` into an artifact.
    ///
    /// Paths are relative to the base path.
    ///
    /// # Errors
    ///
    /// Returns an error if a template cannot be read or parsed.
    pub fn load_artifact(&self, file: &StackFile) -> Result<StackArtifact> {
        let stack = &file.stack;
        let template = self.read_template(&stack.template)?;

        let mut artifact = StackArtifact::new(stack.name.clone(), template)
            .with_tags(
                stack
                    .tags
                    .iter()
                    .map(|(key, value)| Tag::new(key, value))
                    .collect(),
            )
            .with_notification_arns(stack.notification_arns.clone())
            .with_termination_protection(stack.termination_protection);

        for (asset_path, template_path) in &stack.nested_templates {
            let nested = self.read_template(template_path)?;
            artifact = artifact.with_nested_template(asset_path.clone(), nested);
        }
        for (construct_path, entries) in &stack.metadata {
            for entry in entries {
                artifact = artifact.with_metadata(
                    construct_path.clone(),
                    MetadataEntry {
                        entry_type: entry.entry_type.clone(),
                        data: Value::String(entry.data.clone()),
                        trace: entry.trace.clone(),
                    },
                );
            }
        }
        Ok(artifact)
    }

    fn read_template(&self, relative: &str) -> Result<Value> {
        let path = self.resolve(relative);
        debug!("Reading template {}", path.display());
        let body = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::from(ConfigError::FileNotFound { path: path.clone() })
            } else {
                DeployError::from(e)
            }
        })?;
        parse_template_body(&body)
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        match &self.base_path {
            Some(base) => base.join(relative),
            None => PathBuf::from(relative),
        }
    }

    /// The control plane endpoint, from the stack file or `HALLDYLL_ENDPOINT`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither is set.
    pub fn endpoint(file: &StackFile) -> Result<String> {
        file.control_plane
            .endpoint
            .clone()
            .or_else(|| std::env::var(ENDPOINT_ENV).ok())
            .ok_or_else(|| {
                ConfigError::MissingEnvVar {
                    name: String::from(ENDPOINT_ENV),
                }
                .into()
            })
    }

    /// The control plane token from `HALLDYLL_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn api_token() -> Result<String> {
        std::env::var(API_TOKEN_ENV).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: String::from(API_TOKEN_ENV),
            }
            .into()
        })
    }
}

/// Applies `HALLDYLL_*` overrides read through `lookup`.
pub fn apply_overrides(file: &mut StackFile, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(name) = lookup(STACK_NAME_ENV).filter(|n| !n.is_empty()) {
        debug!("Overriding stack.name from environment");
        file.stack.name = name;
    }
    if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|e| !e.is_empty()) {
        debug!("Overriding control_plane.endpoint from environment");
        file.control_plane.endpoint = Some(endpoint);
    }
}

/// Stack file names searched for.
pub const DEFAULT_STACK_FILES: &[&str] = &[
    "halldyll.stack.yaml",
    "halldyll.stack.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the stack file in `start_dir` or its parents.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_stack_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_STACK_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found stack file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_STACK_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::HotswapMode;
    use crate::monitor::ProgressStyle;
    use std::collections::BTreeMap;

    const STACK_FILE: &str = r"
stack:
  name: orders
  template: template.yaml
  termination_protection: true
  tags:
    team: core
  nested_templates:
    child.nested.template.json: nested/child.json
  parameters:
    Size: '2'
  metadata:
    /orders/Queue/Resource:
      - type: aws:cdk:logicalId
        data: Queue
deploy:
  hotswap: fall-back
  progress: live
";

    #[test]
    fn test_parse_minimal_stack_file() {
        let yaml = r"
stack:
  name: orders
  template: template.json
";
        let file = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("stack file should parse");

        assert_eq!(file.stack.name, "orders");
        assert!(file.deploy.rollback);
        assert_eq!(file.deploy.hotswap, HotswapMode::FullDeployment);
        assert_eq!(file.control_plane.timeout_secs, 30);
        assert_eq!(file.control_plane.poll_interval_secs, 5);
    }

    #[test]
    fn test_parse_full_stack_file() {
        let file = ConfigParser::new()
            .parse_yaml(STACK_FILE, None)
            .expect("stack file should parse");

        assert!(file.stack.termination_protection);
        assert_eq!(file.stack.parameters.get("Size").map(String::as_str), Some("2"));
        assert_eq!(file.deploy.hotswap, HotswapMode::FallBack);
        assert_eq!(file.deploy.progress, Some(ProgressStyle::Live));
    }

    #[test]
    fn test_invalid_yaml_is_a_parse_error() {
        let err = ConfigParser::new()
            .parse_yaml("stack: [", None)
            .expect_err("parse should fail");

        assert!(err.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_artifact_reads_templates() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("halldyll.stack.yaml"), STACK_FILE).expect("write");
        std::fs::write(
            dir.path().join("template.yaml"),
            "Resources:\n  Queue:\n    Type: AWS::SQS::Queue\n",
        )
        .expect("write");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("nested/child.json"), r#"{"Resources": {}}"#)
            .expect("write");

        let parser = ConfigParser::new().with_base_path(dir.path());
        let file = parser
            .load_file(dir.path().join("halldyll.stack.yaml"))
            .expect("stack file should load");
        let artifact = parser.load_artifact(&file).expect("artifact should load");

        assert_eq!(artifact.stack_name, "orders");
        assert_eq!(
            artifact.template["Resources"]["Queue"]["Type"],
            "AWS::SQS::Queue"
        );
        assert!(artifact.nested_template("child.nested.template.json").is_some());
        assert_eq!(artifact.tags, vec![Tag::new("team", "core")]);
        assert!(artifact.termination_protection);
        assert_eq!(
            artifact
                .find_metadata_for_logical_id("Queue")
                .map(|m| m.construct_path),
            Some(String::from("/orders/Queue/Resource"))
        );
    }

    #[test]
    fn test_missing_template_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = ConfigParser::new()
            .parse_yaml("stack:\n  name: orders\n  template: missing.json\n", None)
            .expect("stack file should parse");

        let err = ConfigParser::new()
            .with_base_path(dir.path())
            .load_artifact(&file)
            .expect_err("load should fail");

        assert!(err.to_string().contains("Stack file not found"));
    }

    #[test]
    fn test_env_overrides() {
        let mut file = ConfigParser::new()
            .parse_yaml(STACK_FILE, None)
            .expect("stack file should parse");
        let env = BTreeMap::from([
            (STACK_NAME_ENV, "orders-staging"),
            (ENDPOINT_ENV, "https://cp.example"),
        ]);

        apply_overrides(&mut file, |name| env.get(name).map(|v| (*v).to_string()));

        assert_eq!(file.stack.name, "orders-staging");
        assert_eq!(file.control_plane.endpoint.as_deref(), Some("https://cp.example"));
    }

    #[test]
    fn test_find_stack_file_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("halldyll.stack.yaml"), STACK_FILE).expect("write");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_stack_file(&nested).expect("stack file should be found");

        assert_eq!(found, dir.path().join("halldyll.stack.yaml"));
    }
}

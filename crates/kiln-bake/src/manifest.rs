//! Provisioning manifest.
//!
//! The payload executed inside the instance is versioned external data,
//! not orchestrator logic: an ordered list of steps, each either a
//! command to run or a file to push. The component contracts stay stable
//! across payload changes.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BakeError, BakeResult};

/// Timeout class of a command step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepClass {
    /// Short administrative command.
    #[default]
    Short,
    /// Long-running operation (package installs and the like).
    Long,
}

/// One provisioning step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Run an argv-style command inside the instance.
    Run {
        name: Option<String>,
        argv: Vec<String>,
        class: StepClass,
    },
    /// Push a local file into the instance.
    File {
        name: Option<String>,
        source: PathBuf,
        dest: String,
    },
}

impl Step {
    /// Human-readable label for logging.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Run { name, argv, .. } => name
                .clone()
                .unwrap_or_else(|| argv.first().cloned().unwrap_or_default()),
            Self::File { name, dest, .. } => name.clone().unwrap_or_else(|| dest.clone()),
        }
    }
}

/// A parsed provisioning manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub version: u32,
    pub steps: Vec<Step>,

    /// Directory the manifest was loaded from; relative file sources
    /// resolve against it.
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Load and validate a manifest from a TOML file.
    pub fn load(path: &Path) -> BakeResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BakeError::Manifest(format!("cannot read {}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_owned();
        Self::parse(&content, base_dir)
    }

    fn parse(content: &str, base_dir: PathBuf) -> BakeResult<Self> {
        let raw: RawManifest =
            toml::from_str(content).map_err(|e| BakeError::Manifest(e.to_string()))?;

        let mut steps = Vec::with_capacity(raw.step.len());
        for (index, raw_step) in raw.step.into_iter().enumerate() {
            steps.push(raw_step.into_step(index)?);
        }

        Ok(Self {
            version: raw.version,
            steps,
            base_dir,
        })
    }

    /// Resolve a file-step source against the manifest directory.
    #[must_use]
    pub fn resolve_source(&self, source: &Path) -> PathBuf {
        if source.is_absolute() {
            source.to_owned()
        } else {
            self.base_dir.join(source)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default)]
    step: Vec<RawStep>,
}

const fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawStep {
    name: Option<String>,
    run: Option<Vec<String>>,
    file: Option<RawFile>,
    #[serde(default)]
    class: StepClass,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    source: PathBuf,
    dest: String,
}

impl RawStep {
    fn into_step(self, index: usize) -> BakeResult<Step> {
        match (self.run, self.file) {
            (Some(argv), None) => {
                if argv.is_empty() {
                    return Err(BakeError::Manifest(format!(
                        "step {index}: run command is empty"
                    )));
                }
                Ok(Step::Run {
                    name: self.name,
                    argv,
                    class: self.class,
                })
            }
            (None, Some(file)) => {
                if !file.dest.starts_with('/') {
                    return Err(BakeError::Manifest(format!(
                        "step {index}: file dest must be an absolute path"
                    )));
                }
                Ok(Step::File {
                    name: self.name,
                    source: file.source,
                    dest: file.dest,
                })
            }
            (Some(_), Some(_)) => Err(BakeError::Manifest(format!(
                "step {index}: has both run and file"
            ))),
            (None, None) => Err(BakeError::Manifest(format!(
                "step {index}: needs either run or file"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_mixed_manifest() {
        let content = r#"
            version = 1

            [[step]]
            name = "install packages"
            run = ["sh", "-c", "apt-get update && apt-get install -y nginx"]
            class = "long"

            [[step]]
            file = { source = "payload/index.html", dest = "/var/www/html/index.html" }

            [[step]]
            run = ["systemctl", "enable", "nginx"]
        "#;

        let manifest = Manifest::parse(content, PathBuf::from("/opt/payloads")).unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(manifest.steps.len(), 3);

        match &manifest.steps[0] {
            Step::Run { argv, class, .. } => {
                assert_eq!(argv[0], "sh");
                assert_eq!(*class, StepClass::Long);
            }
            other => panic!("expected run step, got {other:?}"),
        }
        match &manifest.steps[2] {
            Step::Run { class, .. } => assert_eq!(*class, StepClass::Short),
            other => panic!("expected run step, got {other:?}"),
        }
    }

    #[test]
    fn relative_file_source_resolves_against_manifest_dir() {
        let content = r#"
            [[step]]
            file = { source = "payload/index.html", dest = "/srv/index.html" }
        "#;
        let manifest = Manifest::parse(content, PathBuf::from("/opt/build")).unwrap();
        match &manifest.steps[0] {
            Step::File { source, .. } => {
                assert_eq!(
                    manifest.resolve_source(source),
                    PathBuf::from("/opt/build/payload/index.html")
                );
            }
            other => panic!("expected file step, got {other:?}"),
        }
    }

    #[test]
    fn step_with_both_run_and_file_is_rejected() {
        let content = r#"
            [[step]]
            run = ["true"]
            file = { source = "a", dest = "/b" }
        "#;
        assert!(matches!(
            Manifest::parse(content, PathBuf::new()),
            Err(BakeError::Manifest(_))
        ));
    }

    #[test]
    fn empty_step_is_rejected() {
        let content = "[[step]]\nname = \"nothing\"\n";
        assert!(Manifest::parse(content, PathBuf::new()).is_err());
    }

    #[test]
    fn relative_dest_is_rejected() {
        let content = r#"
            [[step]]
            file = { source = "a", dest = "relative/path" }
        "#;
        assert!(Manifest::parse(content, PathBuf::new()).is_err());
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(&path, "[[step]]\nrun = [\"true\"]\n").unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.steps.len(), 1);
        assert_eq!(manifest.base_dir, dir.path());
    }
}

//! Loading and validating the JSON build definition.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn default_architecture() -> String {
    "amd64".to_string()
}

/// The on-disk shape of `definitions/<name>.json`.
#[derive(Deserialize, Clone, Debug)]
pub struct Definition {
    #[serde(default = "default_architecture")]
    pub architecture: String,
    pub keyring: String,
    pub archive_url: String,
    pub suites: Vec<String>,
}

/// Resolved build configuration, derived from a [`Definition`].
#[derive(Clone, Debug)]
pub struct DistributionSpec {
    pub architecture: String,
    pub keyring: String,
    pub archive_url: String,
    pub suites: Vec<String>,
}

impl From<Definition> for DistributionSpec {
    fn from(def: Definition) -> Self {
        DistributionSpec {
            architecture: def.architecture,
            keyring: def.keyring,
            archive_url: def.archive_url,
            suites: def.suites,
        }
    }
}

impl DistributionSpec {
    pub fn keyring_path(&self) -> PathBuf {
        Path::new("keyrings").join(format!("{}.gpg", self.keyring))
    }
}

/// Validates the `name` positional argument: no dots, no slashes.
pub fn validate_definition_name(name: &str) -> Result<()> {
    if name.contains('.') || name.contains('/') {
        bail!("invalid definition name: {}", name);
    }

    Ok(())
}

pub fn load_definition(name: &str) -> Result<DistributionSpec> {
    validate_definition_name(name)?;
    let path = Path::new("definitions").join(format!("{}.json", name));
    let mut f = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut content = String::new();
    content.reserve(1024);
    f.read_to_string(&mut content)?;

    let def: Definition =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    if def.suites.is_empty() {
        bail!("definition {} lists no suites", name);
    }

    Ok(def.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotted_or_slashed_names() {
        assert!(validate_definition_name("../etc").is_err());
        assert!(validate_definition_name("foo.json").is_err());
        assert!(validate_definition_name("foo/bar").is_err());
        assert!(validate_definition_name("bookworm").is_ok());
    }

    #[test]
    fn defaults_architecture_to_amd64() {
        let def: Definition =
            serde_json::from_str(r#"{"keyring":"k","archive_url":"http://m/","suites":["x"]}"#)
                .unwrap();
        assert_eq!(def.architecture, "amd64");
    }
}

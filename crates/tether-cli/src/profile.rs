//! Named launch profiles, read from `~/.config/tether/profiles.yaml`:
//!
//! ```yaml
//! default:
//!   provider: deepseek
//!   model: deepseek-chat
//!   tool_servers:
//!     - tether serve
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub provider: Option<String>,
    pub host: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub tool_servers: Vec<String>,
}

pub fn profiles_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
    Ok(home_dir.join(".config").join("tether").join("profiles.yaml"))
}

/// Look up a named profile. Missing file or missing name both yield `None`.
pub fn load_profile(name: &str) -> Result<Option<Profile>> {
    load_profile_from(&profiles_path()?, name)
}

fn load_profile_from(path: &Path, name: &str) -> Result<Option<Profile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let profiles: HashMap<String, Profile> = serde_yaml::from_str(&raw)?;
    Ok(profiles.get(name).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.yaml");
        std::fs::write(
            &path,
            concat!(
                "default:\n",
                "  provider: deepseek\n",
                "  model: deepseek-chat\n",
                "  tool_servers:\n",
                "    - tether serve\n",
            ),
        )
        .unwrap();

        let profile = load_profile_from(&path, "default").unwrap().unwrap();
        assert_eq!(profile.provider.as_deref(), Some("deepseek"));
        assert_eq!(profile.model.as_deref(), Some("deepseek-chat"));
        assert_eq!(profile.tool_servers, vec!["tether serve"]);

        assert!(load_profile_from(&path, "missing").unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(load_profile_from(&path, "default").unwrap().is_none());
    }
}

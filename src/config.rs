//! Where login credentials come from: the config file, then the environment,
//! then asking on the terminal.

use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::Deserialize;
use tracing::info;

use crate::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "bskymodlist.json";
pub const USERNAME_ENV: &str = "ATPROTO_USERNAME";
pub const PASSWORD_ENV: &str = "ATPROTO_APP_PASSWORD";

/// `~/.config/bskymodlist.json` on Linux, the platform config dir elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub atproto_username: Option<String>,
    #[serde(default)]
    pub atproto_app_password: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// A file that is missing or unreadable counts as empty.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => config,
            Err(error) => {
                info!(path = %path.display(), %error, "no usable config file, asking for credentials instead");
                Self::default()
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub app_password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Fills each value from `config`, then `env`, then `prompt`.
    pub fn resolve(
        config: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        mut prompt: impl FnMut(&str) -> Result<String>,
    ) -> Result<Self> {
        let username = match non_empty(config.atproto_username).or_else(|| non_empty(env(USERNAME_ENV))) {
            Some(username) => username,
            None => prompt("Enter your bluesky username")?,
        };
        let app_password =
            match non_empty(config.atproto_app_password).or_else(|| non_empty(env(PASSWORD_ENV))) {
                Some(password) => password,
                None => prompt("Enter your bluesky app password")?,
            };
        if username.is_empty() || app_password.is_empty() {
            return Err(Error::Config("username and app password are required".into()));
        }
        Ok(Self {
            username,
            app_password,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

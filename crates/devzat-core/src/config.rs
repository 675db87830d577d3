//! Static, load-once-at-boot configuration. Modeled directly on
//! `libshpool::config::{read_config, Config}`: an `Option<T>`-field struct
//! with a `Default` impl, parsed from TOML, falling back to a well-known
//! path when no `--config-file` flag is given. Unlike the teacher there is
//! no hot-reload watcher (see DESIGN.md) — nothing in this spec requires a
//! running server to notice config edits.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Read and parse the config file, falling back to defaults for anything
/// unset (or for a completely missing file).
pub fn read_config(config_file: &Option<String>, default_path: &Path) -> anyhow::Result<Config> {
    let path = match config_file {
        Some(p) => Some(PathBuf::from(p)),
        None => default_path.exists().then(|| default_path.to_path_buf()),
    };

    let Some(path) = path else {
        return Ok(Config::default());
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary SSH listen address, e.g. "0.0.0.0:20000".
    pub ssh_addr: String,

    /// Unauthenticated alternate SSH port (disabled when `private` is set).
    pub ssh_alt_addr: Option<String>,

    /// When true, only `ssh_addr` is bound (no alternate port, no backlog
    /// replay to joiners).
    pub private: bool,

    /// Directory holding `bans.json`, `tokens.json`, `user-prefs/`,
    /// `art.txt`, `neofetch.txt`.
    pub data_dir: PathBuf,

    /// Path to the Ed25519 host key PEM. Generated on first boot if absent.
    pub host_key_path: PathBuf,

    /// gRPC listen address for the plugin RPC bridge.
    pub plugin_addr: String,

    /// A single statically-configured plugin token, in addition to any
    /// minted and persisted in `tokens.json`.
    pub plugin_static_key: Option<String>,

    /// URL to fetch the newline-delimited TOR exit-node IP list from at
    /// boot. Empty disables the fetch.
    pub tor_list_url: String,

    /// Maximum number of entries retained in the `#main` backlog.
    pub backlog_len: usize,

    /// Admin identities (hex SHA-256), who may run admin-gated commands.
    pub admins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ssh_addr: "0.0.0.0:20000".to_string(),
            ssh_alt_addr: Some("0.0.0.0:20001".to_string()),
            private: false,
            data_dir: PathBuf::from("data"),
            host_key_path: PathBuf::from("data/host_key.pem"),
            plugin_addr: "127.0.0.1:20420".to_string(),
            plugin_static_key: None,
            tor_list_url: "https://www.dan.me.uk/torlist/?exit".to_string(),
            backlog_len: 100,
            admins: Vec::new(),
        }
    }
}

impl Config {
    pub fn user_prefs_dir(&self) -> PathBuf {
        self.data_dir.join("user-prefs")
    }

    pub fn bans_path(&self) -> PathBuf {
        self.data_dir.join("bans.json")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.data_dir.join("tokens.json")
    }

    pub fn is_admin(&self, identity: &crate::identity::Identity) -> bool {
        self.admins.iter().any(|a| a == identity.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = read_config(&None, Path::new("/nonexistent/devzat/config.toml")).unwrap();
        assert_eq!(cfg.ssh_addr, "0.0.0.0:20000");
    }

    #[test]
    fn parses_partial_overrides() {
        let toml_str = r#"
            ssh_addr = "0.0.0.0:2222"
            private = true
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.ssh_addr, "0.0.0.0:2222");
        assert!(cfg.private);
        assert_eq!(cfg.backlog_len, 100);
    }
}

//! Per-identity persisted preferences, one JSON file per user under
//! `user-prefs/<id>.json`. Ported from `readUserPrefs`/`writeUserPrefs` in
//! `original_source/main.go`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::identity::Identity;

const LOAD_DEADLINE: Duration = Duration::from_secs(60);

/// Per-user bell policy, spec §3/§4.3: `off` never rings (and strips any
/// `\a` a renderer produced anyway), `on` rings on a mention or inbound DM,
/// `all` rings on every message not sent by the user themself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BellMode {
    Off,
    #[default]
    On,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserPrefs {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub pronouns: Option<String>,
    pub bio: Option<String>,
    pub bell: BellMode,
    pub ping_everytime: bool,
    pub is_muted: bool,
    pub format_time_24: bool,
    pub color: Option<String>,
    pub color_bg: Option<String>,
    pub timezone: Option<String>,
}

impl Default for UserPrefs {
    fn default() -> Self {
        UserPrefs {
            name: None,
            prompt: None,
            pronouns: None,
            bio: None,
            bell: BellMode::On,
            ping_everytime: false,
            is_muted: false,
            format_time_24: false,
            color: None,
            color_bg: None,
            timezone: None,
        }
    }
}

pub struct PrefsStore {
    dir: PathBuf,
}

impl PrefsStore {
    pub fn new(dir: PathBuf) -> Self {
        PrefsStore { dir }
    }

    fn path_for(&self, id: &Identity) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load prefs for `id`, falling back to defaults on any error (missing
    /// file, corrupt JSON) or if loading doesn't finish within
    /// [`LOAD_DEADLINE`] — a slow or hung disk must never block a login.
    #[instrument(skip(self))]
    pub async fn load(&self, id: &Identity) -> UserPrefs {
        let path = self.path_for(id);
        let fut = async {
            match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice(&bytes).ok(),
                Err(_) => None,
            }
        };
        match tokio::time::timeout(LOAD_DEADLINE, fut).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => UserPrefs::default(),
            Err(_) => {
                warn!(id = %id, "loading user prefs timed out, using defaults");
                UserPrefs::default()
            }
        }
    }

    #[instrument(skip(self, prefs))]
    pub async fn save(&self, id: &Identity, prefs: &UserPrefs) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(prefs)?;
        tokio::fs::write(self.path_for(id), json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempdir();
        let store = PrefsStore::new(dir);
        let prefs = store.load(&Identity::from_remote_addr("nobody")).await;
        assert_eq!(prefs, UserPrefs::default());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempdir();
        let store = PrefsStore::new(dir);
        let id = Identity::from_remote_addr("alice");
        let mut prefs = UserPrefs::default();
        prefs.name = Some("alice".into());
        prefs.is_muted = true;
        prefs.bell = BellMode::All;
        store.save(&id, &prefs).await.unwrap();

        let reloaded = store.load(&id).await;
        assert_eq!(reloaded, prefs);
    }

    #[test]
    fn bell_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BellMode::All).unwrap(), "\"all\"");
        assert_eq!(serde_json::from_str::<BellMode>("\"off\"").unwrap(), BellMode::Off);
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("devzat-prefs-{}", rand::random::<u64>()));
        p
    }
}

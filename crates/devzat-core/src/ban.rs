//! Ban store: a small JSON-persisted set of `{addr, identity}` pairs,
//! ported from `saveBans`/`readBans` in `original_source/util.go`. Every
//! mutation re-serializes the whole set, pretty-printed with 3-space
//! indentation, matching the original's `json.NewEncoder(f).SetIndent("",
//! "   ")`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::identity::Identity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ban {
    #[serde(rename = "Addr", default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

pub struct BanStore {
    path: PathBuf,
    bans: RwLock<Vec<Ban>>,
}

impl BanStore {
    #[instrument(skip_all)]
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let bans = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(BanStore { path, bans: RwLock::new(bans) })
    }

    /// True if a client matching either field should be refused, matching
    /// `bansContains` in `original_source/util.go`.
    pub async fn is_banned(&self, addr: &str, identity: &Identity) -> bool {
        let bans = self.bans.read().await;
        bans.iter()
            .any(|b| b.addr.as_deref() == Some(addr) || b.identity.as_ref() == Some(identity))
    }

    pub async fn add(&self, ban: Ban) -> anyhow::Result<()> {
        {
            let mut bans = self.bans.write().await;
            bans.push(ban);
        }
        self.save().await
    }

    /// Remove every ban entry matching the given addr or id. Returns the
    /// number removed.
    pub async fn remove_matching(&self, needle: &str) -> anyhow::Result<usize> {
        let removed;
        {
            let mut bans = self.bans.write().await;
            let before = bans.len();
            bans.retain(|b| {
                b.addr.as_deref() != Some(needle)
                    && b.identity.as_ref().map(Identity::as_str) != Some(needle)
            });
            removed = before - bans.len();
        }
        if removed > 0 {
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<Ban> {
        self.bans.read().await.clone()
    }

    /// Force a re-save, used by the shutdown sequence to guarantee the
    /// on-disk set is current even if nothing changed since the last write.
    pub async fn save_now(&self) -> anyhow::Result<()> {
        self.save().await
    }

    #[instrument(skip_all)]
    async fn save(&self) -> anyhow::Result<()> {
        let bans = self.bans.read().await.clone();
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"   ");
        let mut ser = Serializer::with_formatter(&mut buf, formatter);
        bans.serialize(&mut ser)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(&self.path, buf).await {
            warn!(error = %e, "failed to persist bans.json");
            return Err(e.into());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let dir = tempdir();
        let path = dir.join("bans.json");
        let store = BanStore::load(path.clone()).await.unwrap();
        store
            .add(Ban { addr: Some("1.2.3.4".into()), identity: None })
            .await
            .unwrap();
        store
            .add(Ban { addr: None, identity: Some(Identity::from_remote_addr("x")) })
            .await
            .unwrap();

        let reloaded = BanStore::load(path).await.unwrap();
        assert!(reloaded.is_banned("1.2.3.4", &Identity::from_remote_addr("nope")).await);
        assert!(reloaded.is_banned("nope", &Identity::from_remote_addr("x")).await);
        assert!(!reloaded.is_banned("nope", &Identity::from_remote_addr("nope")).await);
    }

    #[tokio::test]
    async fn remove_matching_persists() {
        let dir = tempdir();
        let path = dir.join("bans.json");
        let store = BanStore::load(path.clone()).await.unwrap();
        store.add(Ban { addr: Some("5.6.7.8".into()), identity: None }).await.unwrap();
        let removed = store.remove_matching("5.6.7.8").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.is_banned("5.6.7.8", &Identity::from_remote_addr("z")).await);
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("devzat-test-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }
}

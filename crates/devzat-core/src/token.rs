//! Plugin token store. Tokens are `dvz@` + base64(32 random bytes),
//! persisted as a JSON object `{token: metadata}`. Ported from the `Tokens`
//! map in `original_source/rpc.go`, with migration support for an older
//! on-disk shape (an array of `{token, data}` objects) per spec §4.8/§6.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::instrument;

const TOKEN_PREFIX: &str = "dvz@";

#[derive(Debug, Serialize, Deserialize)]
struct LegacyTokenEntry {
    token: String,
    data: String,
}

pub struct TokenStore {
    path: PathBuf,
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    #[instrument(skip_all)]
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) => Self::parse(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let store = TokenStore { path, tokens: RwLock::new(tokens) };
        // Re-save immediately so a legacy-shaped file gets migrated to the
        // current shape on first read, per spec §4.8.
        store.save().await?;
        Ok(store)
    }

    fn parse(bytes: &[u8]) -> anyhow::Result<HashMap<String, String>> {
        if let Ok(map) = serde_json::from_slice::<HashMap<String, String>>(bytes) {
            return Ok(map);
        }
        let legacy: Vec<LegacyTokenEntry> = serde_json::from_slice(bytes)?;
        Ok(legacy.into_iter().map(|e| (e.token, e.data)).collect())
    }

    /// Mint a new token with the given metadata, persist it, and return it.
    pub async fn grant(&self, metadata: impl Into<String>) -> anyhow::Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = format!("{TOKEN_PREFIX}{}", STANDARD.encode(raw));
        {
            let mut tokens = self.tokens.write().await;
            tokens.insert(token.clone(), metadata.into());
        }
        self.save().await?;
        Ok(token)
    }

    /// Remove the token whose SHA-256 hex digest matches `hash`. Returns
    /// true if a token was removed. `lstokens`/`revoke` never expose the
    /// raw token, only its hash, per spec §4.8.
    pub async fn revoke_by_hash(&self, hash: &str) -> anyhow::Result<bool> {
        let mut tokens = self.tokens.write().await;
        let victim = tokens.keys().find(|t| hex_sha256(t) == hash).cloned();
        let Some(victim) = victim else { return Ok(false) };
        tokens.remove(&victim);
        drop(tokens);
        self.save().await?;
        Ok(true)
    }

    pub async fn is_valid(&self, token: &str, static_key: Option<&str>) -> bool {
        if let Some(key) = static_key {
            if token == key {
                return true;
            }
        }
        self.tokens.read().await.contains_key(token)
    }

    /// Non-blocking variant of [`is_valid`](Self::is_valid), for use from a
    /// synchronous gRPC auth interceptor. Token writes are rare, so a
    /// contended lock (treated as invalid) only ever costs one retried RPC.
    pub fn is_valid_sync(&self, token: &str, static_key: Option<&str>) -> bool {
        if let Some(key) = static_key {
            if token == key {
                return true;
            }
        }
        self.tokens.try_read().map(|t| t.contains_key(token)).unwrap_or(false)
    }

    /// `(hash, metadata)` pairs for `lstokens`.
    pub async fn list_hashed(&self) -> Vec<(String, String)> {
        self.tokens
            .read()
            .await
            .iter()
            .map(|(t, meta)| (hex_sha256(t), meta.clone()))
            .collect()
    }

    #[instrument(skip_all)]
    async fn save(&self) -> anyhow::Result<()> {
        let tokens = self.tokens.read().await.clone();
        let json = serde_json::to_vec_pretty(&tokens)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn hex_sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grant_and_validate() {
        let path = tempfile();
        let store = TokenStore::load(path).await.unwrap();
        let token = store.grant("alice").await.unwrap();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(store.is_valid(&token, None).await);
        assert!(!store.is_valid("dvz@garbage", None).await);
    }

    #[tokio::test]
    async fn static_key_always_valid() {
        let path = tempfile();
        let store = TokenStore::load(path).await.unwrap();
        assert!(store.is_valid("static-key", Some("static-key")).await);
    }

    #[tokio::test]
    async fn revoke_by_hash_removes_token() {
        let path = tempfile();
        let store = TokenStore::load(path).await.unwrap();
        let token = store.grant("bob").await.unwrap();
        let hash = hex_sha256(&token);
        assert!(store.revoke_by_hash(&hash).await.unwrap());
        assert!(!store.is_valid(&token, None).await);
    }

    #[tokio::test]
    async fn migrates_legacy_array_shape() {
        let path = tempfile();
        let legacy = serde_json::json!([{"token": "dvz@old", "data": "carol"}]);
        tokio::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).await.unwrap();

        let store = TokenStore::load(path.clone()).await.unwrap();
        assert!(store.is_valid("dvz@old", None).await);

        let reloaded = tokio::fs::read(&path).await.unwrap();
        let as_map: HashMap<String, String> = serde_json::from_slice(&reloaded).unwrap();
        assert_eq!(as_map.get("dvz@old"), Some(&"carol".to_string()));
    }

    fn tempfile() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("devzat-tokens-{}.json", rand::random::<u64>()));
        p
    }
}

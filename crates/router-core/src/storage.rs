use std::marker::PhantomData;
use std::path::PathBuf;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;

/// A single JSON document, rewritten in full on every mutation. Every
/// router component (ledger, governor, breaker, dedup table, health
/// table, pending-plan table, model-registry cache) persists through one
/// of these rather than rolling its own file I/O.
///
/// Reads are served from the in-memory copy; `load` is only called once,
/// at construction. At-least-once write is all the layout requires, so a
/// plain `fs::write` is enough — no write-then-rename.
pub struct JsonDocument<T> {
    path: PathBuf,
    value: RwLock<T>,
    _marker: PhantomData<T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    pub async fn open(path: PathBuf) -> anyhow::Result<Self> {
        let value = Self::load_from(&path).await?;
        Ok(Self { path, value: RwLock::new(value), _marker: PhantomData })
    }

    async fn load_from(path: &PathBuf) -> anyhow::Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    pub async fn get(&self) -> T {
        self.value.read().await.clone()
    }

    /// Mutates the in-memory value and persists the result. `f` returns
    /// whatever the caller wants to hand back from the mutation.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> anyhow::Result<R> {
        let mut guard = self.value.write().await;
        let result = f(&mut guard);
        self.persist(&guard).await?;
        Ok(result)
    }

    async fn persist(&self, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, raw)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: u64,
    }

    #[tokio::test]
    async fn load_save_load_is_a_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");

        let doc = JsonDocument::<Counter>::open(path.clone()).await.unwrap();
        doc.mutate(|c| c.n += 1).await.unwrap();
        doc.mutate(|c| c.n += 1).await.unwrap();

        let reopened = JsonDocument::<Counter>::open(path).await.unwrap();
        assert_eq!(reopened.get().await, Counter { n: 2 });
    }

    #[tokio::test]
    async fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let doc = JsonDocument::<Counter>::open(path).await.unwrap();
        assert_eq!(doc.get().await, Counter::default());
    }
}

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{trace, warn};

/// Reads a JSON document, falling back to the default value when the file is
/// missing or cannot be decoded.
pub async fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match load_json(path).await {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            warn!("Ignoring unreadable {}: {:#}", path.display(), e);
            T::default()
        }
    }
}

/// Reads a JSON document, `None` when the file does not exist.
pub async fn load_json<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let value = serde_json::from_str(&raw).with_context(|| format!("decoding {}", path.display()))?;
    Ok(Some(value))
}

/// Writes the value as indented JSON, creating the parent directory.
pub async fn save_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("encoding JSON")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    trace!("Saved {}", path.display());
    Ok(())
}

/// Best-effort variant of `save_json`: failures are logged and reported as
/// `false`, never propagated.
pub async fn save_json_best_effort<T>(path: &Path, value: &T) -> bool
where
    T: Serialize + ?Sized,
{
    match save_json(path, value).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not persist {}: {:#}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let value: Vec<String> = load_json_or_default(&dir.path().join("absent.json")).await;
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let value: Vec<u32> = load_json_or_default(&path).await;
        assert!(value.is_empty());
        assert!(load_json::<Vec<u32>>(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");
        assert!(save_json_best_effort(&path, &vec![1u32, 2, 3]).await);
        let value: Vec<u32> = load_json_or_default(&path).await;
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unwritable_target_is_reported() {
        let dir = tempdir().unwrap();
        // A directory cannot be overwritten by a file
        assert!(!save_json_best_effort(dir.path(), &vec![1u32]).await);
    }
}

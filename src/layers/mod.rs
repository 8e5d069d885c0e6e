pub mod files;
pub mod tarsum;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RegistryError;
use crate::storage::{paths, Backend, StorageError};
use tarsum::TarInfo;

/// Persists a client-supplied checksum after validating that it names a
/// digest this registry can ever mint.
pub async fn store_checksum(
    backend: &dyn Backend,
    image_id: &str,
    checksum: &str,
) -> Result<(), RegistryError> {
    if !checksum.starts_with("sha256:") && !checksum.starts_with("tarsum+sha256") {
        return Err(RegistryError::BadRequest(
            "Invalid checksum format".to_string(),
        ));
    }
    backend
        .put(&paths::image_checksum(image_id), checksum.as_bytes())
        .await?;
    Ok(())
}

/// Builds the ancestry array for `image_id`: itself, then the parent chain.
/// A declared parent whose ancestry cannot be read fails the call.
pub async fn generate_ancestry(
    backend: &dyn Backend,
    image_id: &str,
    parent_id: &str,
) -> Result<(), RegistryError> {
    if parent_id.is_empty() {
        let data = serde_json::to_vec(&[image_id])?;
        backend.put(&paths::image_ancestry(image_id), &data).await?;
        return Ok(());
    }
    let parent_raw = backend.get(&paths::image_ancestry(parent_id)).await?;
    let mut chain: Vec<String> = serde_json::from_slice(&parent_raw)?;
    chain.insert(0, image_id.to_string());
    let data = serde_json::to_vec(&chain)?;
    backend.put(&paths::image_ancestry(image_id), &data).await?;
    Ok(())
}

pub async fn set_files_cache(backend: &dyn Backend, image_id: &str, files_json: &[u8]) {
    if let Err(err) = backend.put(&paths::image_files(image_id), files_json).await {
        log::warn!("failed to cache files listing for {image_id}: {err}");
    }
}

/// Returns the cached files listing, regenerating it from the stored layer
/// on a miss. A missing layer is `NotFound`; a malformed archive is `Tar`.
pub async fn get_files_json(
    backend: &dyn Backend,
    image_id: &str,
) -> Result<Vec<u8>, RegistryError> {
    let cache_key = paths::image_files(image_id);
    if backend.exists(&cache_key).await {
        return Ok(backend.get(&cache_key).await?);
    }

    let blob = match backend.open_seekable(&paths::image_layer(image_id)).await {
        Ok(blob) => blob,
        Err(StorageError::NotFound) => {
            return Err(RegistryError::NotFound("Image".to_string()))
        }
        Err(err) => return Err(err.into()),
    };
    let info = tokio::task::spawn_blocking(move || {
        let mut info = TarInfo::new(&[]);
        info.load(blob);
        info
    })
    .await
    .map_err(|err| RegistryError::Io(err.to_string()))?;

    if let Some(err) = info.error {
        return Err(RegistryError::Tar(err));
    }
    let json = info.files.to_json()?;
    set_files_cache(backend, image_id, &json).await;
    Ok(json)
}

/// Cached diff bytes, or `None` on a plain cache miss.
pub async fn get_diff_cache(
    backend: &dyn Backend,
    image_id: &str,
) -> Result<Option<Vec<u8>>, RegistryError> {
    match backend.get(&paths::image_diff(image_id)).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StorageError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Best-effort diff regeneration, run as a detached task. Success or
/// failure is invisible to the request that triggered it.
pub async fn generate_diff(backend: Arc<dyn Backend>, image_id: String) {
    if let Err(err) = try_generate_diff(backend.as_ref(), &image_id).await {
        log::warn!("diff generation failed for {image_id}: {err}");
    }
}

/// Compares the image's file listing against the union of its ancestors'
/// listings, keyed by file name: whiteouts are `deleted`, names unseen in
/// any ancestor are `added`, names whose info differs are `changed`.
async fn try_generate_diff(backend: &dyn Backend, image_id: &str) -> Result<(), RegistryError> {
    let ancestry_raw = backend.get(&paths::image_ancestry(image_id)).await?;
    let ancestry: Vec<String> = serde_json::from_slice(&ancestry_raw)?;

    let mut previous: HashMap<String, Value> = HashMap::new();
    for ancestor in ancestry.iter().skip(1) {
        let rows: Vec<Value> = serde_json::from_slice(&get_files_json(backend, ancestor).await?)?;
        for row in rows {
            if let Some((name, info)) = split_row(&row) {
                previous.entry(name).or_insert(info);
            }
        }
    }

    let rows: Vec<Value> = serde_json::from_slice(&get_files_json(backend, image_id).await?)?;
    let mut added = Map::new();
    let mut deleted = Map::new();
    let mut changed = Map::new();
    for row in rows {
        let Some((name, info)) = split_row(&row) else {
            continue;
        };
        let is_deleted = row
            .get(2)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_deleted {
            deleted.insert(name, info);
        } else if !previous.contains_key(&name) {
            added.insert(name, info);
        } else if previous[&name] != info {
            changed.insert(name, info);
        }
    }

    let diff = serde_json::json!({
        "added": added,
        "deleted": deleted,
        "changed": changed,
    });
    backend
        .put(&paths::image_diff(image_id), &serde_json::to_vec(&diff)?)
        .await?;
    Ok(())
}

/// Splits a files-listing row into its name and the remaining info tuple.
fn split_row(row: &Value) -> Option<(String, Value)> {
    let fields = row.as_array()?;
    let name = fields.first()?.as_str()?.to_string();
    Some((name, Value::Array(fields[1..].to_vec())))
}

//! Copying finished transfers into the library.

use crate::error::DeliveryError;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Copy a downloaded artifact to its library destination
///
/// `destination` carries no extension; the source file's extension is
/// appended. When the engine reports a directory, its largest file is taken
/// to be the episode. The copy is written next to the destination and renamed
/// into place, so a library scan never sees a partial file.
///
/// Returns the final library path.
pub(crate) async fn copy_artifact(source: &Path, destination: &Path) -> Result<PathBuf> {
    let file = episode_file(source).await?;

    let final_path = match file.extension() {
        Some(ext) => destination.with_extension(ext),
        None => destination.to_path_buf(),
    };

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut partial = final_path.clone().into_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    debug!(?file, ?final_path, "copying episode into library");

    if let Err(e) = fs::copy(&file, &partial).await {
        fs::remove_file(&partial).await.ok();
        return Err(copy_failed(&file, &final_path, e));
    }
    if let Err(e) = fs::rename(&partial, &final_path).await {
        fs::remove_file(&partial).await.ok();
        return Err(copy_failed(&file, &final_path, e));
    }

    Ok(final_path)
}

/// The file inside `source` that holds the episode
async fn episode_file(source: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(source)
        .await
        .map_err(|e| copy_failed(source, source, e))?;

    if metadata.is_file() {
        return Ok(source.to_path_buf());
    }

    let mut largest: Option<(u64, PathBuf)> = None;
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let len = entry.metadata().await?.len();
                if largest.as_ref().is_none_or(|(best, _)| len > *best) {
                    largest = Some((len, entry.path()));
                }
            }
        }
    }

    largest.map(|(_, path)| path).ok_or_else(|| {
        Error::Delivery(DeliveryError::CopyFailed {
            source_path: source.to_path_buf(),
            dest_path: PathBuf::new(),
            reason: "downloaded directory contains no files".to_string(),
        })
    })
}

fn copy_failed(source: &Path, destination: &Path, e: std::io::Error) -> Error {
    Error::Delivery(DeliveryError::CopyFailed {
        source_path: source.to_path_buf(),
        dest_path: destination.to_path_buf(),
        reason: e.to_string(),
    })
}

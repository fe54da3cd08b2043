//! Upload and delete workflows for a single file.

use std::sync::Arc;
use std::time::Duration;

use dht::{DhtClient, DhtKey, ProtectionKey};
use process::{AsyncComponent, Process, ProcessStep, SequentialProcess};
use serde::{Deserialize, Serialize};

use crate::profile::{ProfileChange, ProfileStep};
use crate::steps::{DelayedStep, PutStep, RemoveStep};
use crate::{Result, STEP_PUT_META, STEP_REMOVE_META, STEP_UPDATE_PROFILE, WorkflowError};

pub fn meta_key(file_id: &str) -> DhtKey {
    DhtKey::new(file_id, "meta")
}

pub fn chunk_key(file_id: &str, index: usize) -> DhtKey {
    DhtKey::new(file_id, format!("chunk-{index}"))
}

/// The meta document describing an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub chunk_count: usize,
}

/// A file to upload on behalf of `owner`.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_id: String,
    pub owner: String,
    pub name: String,
    pub content: Vec<u8>,
    /// Guards every entry the upload writes.
    pub protection_key: ProtectionKey,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: usize,
    /// Artificial latency before each chunk put.
    pub chunk_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            chunk_delay: Duration::ZERO,
        }
    }
}

impl FileUpload {
    pub fn meta(&self, options: &UploadOptions) -> FileMeta {
        FileMeta {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
            size: self.content.len() as u64,
            chunk_count: self.content.len().div_ceil(options.chunk_size),
        }
    }
}

/// Builds the upload workflow for `file`.
///
/// The returned process is not started. Chunk puts are forked, so they
/// overlap with each other and with the profile update; the process only
/// succeeds once all of them have.
pub fn upload_file_process(
    dht: Arc<dyn DhtClient>,
    file: &FileUpload,
    options: &UploadOptions,
) -> Result<Arc<SequentialProcess>> {
    if options.chunk_size == 0 {
        return Err(WorkflowError::InvalidOptions(
            "chunk size must be positive".to_string(),
        ));
    }

    let meta = file.meta(options);
    let guard = Some(file.protection_key.clone());
    let process = SequentialProcess::new(format!("upload {}", file.name));

    process.add(Arc::new(ProcessStep::new(
        STEP_PUT_META,
        PutStep::new(
            dht.clone(),
            meta_key(&file.file_id),
            serde_json::to_vec(&meta)?,
            guard.clone(),
        ),
    )))?;

    for (index, chunk) in file.content.chunks(options.chunk_size).enumerate() {
        let put = PutStep::new(
            dht.clone(),
            chunk_key(&file.file_id, index),
            chunk.to_vec(),
            guard.clone(),
        );
        let step = Arc::new(ProcessStep::new(
            format!("put_chunk_{index}"),
            DelayedStep::new(options.chunk_delay, put),
        ));
        process.add(Arc::new(AsyncComponent::new(step)))?;
    }

    process.add(Arc::new(ProcessStep::new(
        STEP_UPDATE_PROFILE,
        ProfileStep::new(
            dht,
            &file.owner,
            ProfileChange::AddFile(file.file_id.clone()),
            guard,
        ),
    )))?;

    tracing::debug!(
        file_id = %file.file_id,
        chunks = meta.chunk_count,
        "upload workflow built"
    );
    Ok(process)
}

/// Builds the delete workflow for a file described by `meta`.
///
/// Chunks are removed one by one, then the meta document, then the profile
/// entry. A failure puts back everything removed so far.
pub fn delete_file_process(
    dht: Arc<dyn DhtClient>,
    owner: &str,
    meta: &FileMeta,
    protection_key: &ProtectionKey,
) -> Result<Arc<SequentialProcess>> {
    let guard = Some(protection_key.clone());
    let process = SequentialProcess::new(format!("delete {}", meta.name));

    for index in 0..meta.chunk_count {
        process.add(Arc::new(ProcessStep::new(
            format!("remove_chunk_{index}"),
            RemoveStep::new(dht.clone(), chunk_key(&meta.file_id, index), guard.clone()),
        )))?;
    }
    process.add(Arc::new(ProcessStep::new(
        STEP_REMOVE_META,
        RemoveStep::new(dht.clone(), meta_key(&meta.file_id), guard.clone()),
    )))?;
    process.add(Arc::new(ProcessStep::new(
        STEP_UPDATE_PROFILE,
        ProfileStep::new(
            dht,
            owner,
            ProfileChange::RemoveFile(meta.file_id.clone()),
            guard,
        ),
    )))?;

    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht::InMemoryDht;
    use process::ProcessComponent;

    fn upload(size: usize) -> FileUpload {
        FileUpload {
            file_id: "f1".to_string(),
            owner: "alice".to_string(),
            name: "notes.txt".to_string(),
            content: vec![7; size],
            protection_key: ProtectionKey::new("alice-key"),
        }
    }

    #[test]
    fn test_meta_counts_partial_chunks() {
        let options = UploadOptions {
            chunk_size: 4,
            ..Default::default()
        };
        assert_eq!(upload(8).meta(&options).chunk_count, 2);
        assert_eq!(upload(9).meta(&options).chunk_count, 3);
        assert_eq!(upload(0).meta(&options).chunk_count, 0);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let options = UploadOptions {
            chunk_size: 0,
            ..Default::default()
        };
        let result = upload_file_process(Arc::new(InMemoryDht::new()), &upload(4), &options);
        assert!(matches!(result, Err(WorkflowError::InvalidOptions(_))));
    }

    #[test]
    fn test_upload_layout() {
        let options = UploadOptions {
            chunk_size: 4,
            ..Default::default()
        };
        let process =
            upload_file_process(Arc::new(InMemoryDht::new()), &upload(10), &options).unwrap();

        let names: Vec<String> = process
            .components()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "put_meta",
                "async(put_chunk_0)",
                "async(put_chunk_1)",
                "async(put_chunk_2)",
                "update_profile",
            ]
        );
        assert!(process.components()[1].async_handle().is_some());
    }
}

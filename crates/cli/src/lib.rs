//! Runs the upload workflow against an in-memory DHT and reports how it
//! ended.

pub mod config;

use std::sync::Arc;

use dht::{DhtClient, InMemoryDht, ProtectionKey};
use process::{
    AsyncComponent, ProcessComponent, ProcessComponentListener, ResultComponent, ResultStep,
    RollbackReason,
};
use workflows::{
    FileMeta, FileUpload, GetStep, UploadOptions, WorkflowError, chunk_key, meta_key,
    upload_file_process,
};

pub use config::{Config, ConfigError};

/// Owner of the demo file.
pub const DEMO_OWNER: &str = "demo-user";

/// How an upload run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Everything was stored; carries the meta document read back.
    Uploaded(FileMeta),
    /// The workflow failed and everything it wrote was removed.
    RolledBack(RollbackReason),
    /// The wait timed out; the workflow was cancelled and rolled back.
    TimedOut(RollbackReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Uploaded(_))
    }
}

/// Logs terminal notifications of the workflow root.
struct OutcomeLogger {
    file_id: String,
}

impl ProcessComponentListener for OutcomeLogger {
    fn on_succeeded(&self) {
        tracing::info!(file_id = %self.file_id, "upload succeeded");
    }

    fn on_failed(&self, reason: &RollbackReason) {
        tracing::warn!(file_id = %self.file_id, hint = reason.hint(), "upload rolled back");
    }
}

/// Builds the demo file: `config.chunks` chunks of `config.chunk_size` bytes.
pub fn demo_file(config: &Config) -> FileUpload {
    let size = config.chunks * config.chunk_size;
    FileUpload {
        file_id: uuid::Uuid::new_v4().to_string(),
        owner: DEMO_OWNER.to_string(),
        name: "demo.bin".to_string(),
        content: (0..size).map(|i| (i % 251) as u8).collect(),
        protection_key: ProtectionKey::generate(),
    }
}

/// Uploads the demo file, waiting at most `config.wait_timeout`.
///
/// A timed out upload is cancelled and its rollback awaited, so the DHT
/// never keeps a partial file when this returns.
pub async fn run_upload(config: &Config, dht: &InMemoryDht) -> Result<RunOutcome, WorkflowError> {
    let file = demo_file(config);
    if let Some(index) = config.fail_chunk {
        dht.fail_put_for(chunk_key(&file.file_id, index)).await;
    }

    let client: Arc<dyn DhtClient> = Arc::new(dht.clone());
    let options = UploadOptions {
        chunk_size: config.chunk_size,
        chunk_delay: config.chunk_delay,
    };
    let upload = upload_file_process(client.clone(), &file, &options)?;
    upload.attach_listener(Arc::new(OutcomeLogger {
        file_id: file.file_id.clone(),
    }));

    let root = AsyncComponent::new(upload);
    tracing::info!(file_id = %file.file_id, chunks = config.chunks, "starting upload");
    root.start().await?;

    let outcome = match root.wait_timeout(config.wait_timeout).await {
        Some(outcome) => outcome,
        None => {
            let reason = RollbackReason::from_hint(format!(
                "upload did not finish within {:?}",
                config.wait_timeout
            ));
            root.cancel(reason.clone()).await?;
            let reason = root.wait().await.err().unwrap_or(reason);
            return Ok(RunOutcome::TimedOut(reason));
        }
    };
    if let Err(reason) = outcome {
        return Ok(RunOutcome::RolledBack(reason));
    }

    let read_back = ResultStep::new("read meta", GetStep::new(client, meta_key(&file.file_id)));
    read_back.start().await?;
    match read_back.result() {
        Some(entry) => Ok(RunOutcome::Uploaded(entry.decode()?)),
        None => Err(WorkflowError::NotFound(meta_key(&file.file_id))),
    }
}

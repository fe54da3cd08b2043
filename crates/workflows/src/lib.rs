//! File synchronisation workflows.
//!
//! Each workflow is a [`process::SequentialProcess`] of DHT steps whose
//! rollbacks undo exactly what the step wrote:
//! 1. Uploading puts the meta document, forks one put per chunk and then
//!    registers the file in the owner's profile
//! 2. Deleting removes the chunks, the meta document and the profile entry
//!
//! If any step fails, everything already written is compensated in reverse
//! order.

pub mod error;
pub mod file;
pub mod profile;
pub mod steps;

pub use error::{Result, WorkflowError};
pub use file::{
    FileMeta, FileUpload, UploadOptions, chunk_key, delete_file_process, meta_key,
    upload_file_process,
};
pub use profile::{ProfileChange, ProfileStep, UserProfile, profile_key};
pub use steps::{DelayedStep, GetStep, PutStep, RemoveStep};

/// Step name: store the file's meta document.
pub const STEP_PUT_META: &str = "put_meta";

/// Step name: register the file in the owner's profile.
pub const STEP_UPDATE_PROFILE: &str = "update_profile";

/// Step name: remove the file's meta document.
pub const STEP_REMOVE_META: &str = "remove_meta";

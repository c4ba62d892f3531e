//! Per-file phase transition applied as copy jobs complete

use crate::crds::{FileProcessPhase, FileStatus};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("source {namespace}/{source_name} not found in status")]
    SourceNotFound {
        namespace: String,
        source_name: String,
    },

    #[error("path {path} not found in source {source_name}")]
    PathNotFound { source_name: String, path: String },

    #[error("wrong state for {source_name}/{path}: from {from} to {to}")]
    IllegalTransition {
        source_name: String,
        path: String,
        from: FileProcessPhase,
        to: FileProcessPhase,
    },
}

/// Moves `path` of the group `namespace/source_name` to `phase`.
///
/// `files` must be sorted by source name with each group sorted by path, as
/// produced by [`super::reconcile`]. Groups sharing a name are told apart by
/// namespace; a group without one matches the empty namespace.
/// Illegal transitions leave the phase untouched.
pub fn update_file_status(
    files: &mut [FileStatus],
    namespace: &str,
    source_name: &str,
    path: &str,
    phase: FileProcessPhase,
    err_message: &str,
) -> Result<(), TransitionError> {
    let start = files.partition_point(|group| group.source_ref.name.as_str() < source_name);
    let group = files[start..]
        .iter_mut()
        .take_while(|group| group.source_ref.name == source_name)
        .find(|group| group.source_ref.namespace.as_deref().unwrap_or_default() == namespace)
        .ok_or_else(|| TransitionError::SourceNotFound {
            namespace: namespace.to_string(),
            source_name: source_name.to_string(),
        })?;

    let index = group
        .files
        .binary_search_by(|file| file.path.as_str().cmp(path))
        .map_err(|_| TransitionError::PathNotFound {
            source_name: source_name.to_string(),
            path: path.to_string(),
        })?;

    let file = &mut group.files[index];
    if !file.phase.can_transition_to(phase) {
        return Err(TransitionError::IllegalTransition {
            source_name: source_name.to_string(),
            path: path.to_string(),
            from: file.phase,
            to: phase,
        });
    }

    file.phase = phase;
    match phase {
        FileProcessPhase::Succeeded => {
            file.last_update_time = Some(chrono::Utc::now().to_rfc3339());
            file.err_message.clear();
        }
        FileProcessPhase::Failed => file.err_message = err_message.to_string(),
        _ => {}
    }
    Ok(())
}

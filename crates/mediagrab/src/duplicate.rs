//! Naming-conflict resolution for output files.
//!
//! A [`DuplicateSession`] is scoped to one run or batch and is passed by
//! reference into every resolution. Once the user answers a prompt with
//! "apply to all", that decision is reused for every later conflict in the
//! same session and nowhere else.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DownloadError, Result};

/// What to do when the output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    Prompt,
    Overwrite,
    Skip,
    #[default]
    Rename,
}

/// Session-wide override recorded from an "apply to all" answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAllDecision {
    SkipAll,
    OverwriteAll,
    RenameAll,
}

/// Single-conflict choice offered by a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateChoice {
    Skip,
    Overwrite,
    Rename,
}

impl DuplicateChoice {
    fn apply_all(self) -> ApplyAllDecision {
        match self {
            Self::Skip => ApplyAllDecision::SkipAll,
            Self::Overwrite => ApplyAllDecision::OverwriteAll,
            Self::Rename => ApplyAllDecision::RenameAll,
        }
    }
}

impl From<ApplyAllDecision> for DuplicateChoice {
    fn from(decision: ApplyAllDecision) -> Self {
        match decision {
            ApplyAllDecision::SkipAll => Self::Skip,
            ApplyAllDecision::OverwriteAll => Self::Overwrite,
            ApplyAllDecision::RenameAll => Self::Rename,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptAnswer {
    pub choice: DuplicateChoice,
    pub apply_to_all: bool,
}

/// Interactive collaborator asked when the policy is [`DuplicatePolicy::Prompt`].
#[async_trait]
pub trait Prompter: Send + Sync {
    /// `base` is the human-readable name of the item being downloaded.
    async fn ask(&self, path: &Path, base: &str) -> Result<PromptAnswer>;
}

/// Always gives the same answer. Useful for non-interactive runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompter(pub PromptAnswer);

#[async_trait]
impl Prompter for FixedPrompter {
    async fn ask(&self, _path: &Path, _base: &str) -> Result<PromptAnswer> {
        Ok(self.0)
    }
}

/// Asks on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

const PROMPT_OPTIONS: [(&str, DuplicateChoice, bool); 6] = [
    ("Rename", DuplicateChoice::Rename, false),
    ("Overwrite", DuplicateChoice::Overwrite, false),
    ("Skip", DuplicateChoice::Skip, false),
    ("Rename all", DuplicateChoice::Rename, true),
    ("Overwrite all", DuplicateChoice::Overwrite, true),
    ("Skip all", DuplicateChoice::Skip, true),
];

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn ask(&self, path: &Path, base: &str) -> Result<PromptAnswer> {
        let message = format!("{} already exists ({base}). What should be done?", path.display());
        let selected = tokio::task::spawn_blocking(move || {
            let labels: Vec<&str> = PROMPT_OPTIONS.iter().map(|(label, _, _)| *label).collect();
            inquire::Select::new(&message, labels).prompt()
        })
        .await
        .map_err(|e| DownloadError::Prompt {
            reason: e.to_string(),
        })?
        .map_err(|e| DownloadError::Prompt {
            reason: e.to_string(),
        })?;

        PROMPT_OPTIONS
            .iter()
            .find(|(label, _, _)| *label == selected)
            .map(|(_, choice, apply_to_all)| PromptAnswer {
                choice: *choice,
                apply_to_all: *apply_to_all,
            })
            .ok_or_else(|| DownloadError::Prompt {
                reason: format!("unknown selection `{selected}`"),
            })
    }
}

/// Result of resolving one output path.
#[derive(Debug)]
pub struct PathResolution {
    pub path: PathBuf,
    pub skip: bool,
    /// Held while the item writes to `path`; `None` when skipping.
    pub reservation: Option<PathReservation>,
}

/// Marks an output path as in use by one item of the session until dropped.
#[derive(Debug)]
pub struct PathReservation {
    path: PathBuf,
    reserved: Arc<parking_lot::Mutex<HashSet<PathBuf>>>,
}

impl Drop for PathReservation {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.path);
    }
}

/// Run-scoped conflict state. Never share one between unrelated batches.
pub struct DuplicateSession {
    decision: Mutex<Option<ApplyAllDecision>>,
    /// Outputs currently being written by items of this session
    reserved: Arc<parking_lot::Mutex<HashSet<PathBuf>>>,
    prompter: Arc<dyn Prompter>,
}

impl DuplicateSession {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            decision: Mutex::new(None),
            reserved: Arc::default(),
            prompter,
        }
    }

    /// A session whose prompts are answered on the terminal.
    pub fn interactive() -> Self {
        Self::new(Arc::new(TerminalPrompter))
    }

    pub async fn decision(&self) -> Option<ApplyAllDecision> {
        *self.decision.lock().await
    }

    /// Whether another item of this session is writing to `path`.
    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.lock().contains(path)
    }

    fn reserve(&self, path: PathBuf) -> PathResolution {
        self.reserved.lock().insert(path.clone());
        PathResolution {
            reservation: Some(PathReservation {
                path: path.clone(),
                reserved: Arc::clone(&self.reserved),
            }),
            path,
            skip: false,
        }
    }

    async fn is_taken(&self, path: &Path) -> Result<bool> {
        Ok(self.is_reserved(path) || path_exists(path).await?)
    }

    /// Insert " (n)" before the extension, counting up from 1 until neither
    /// a file nor an in-flight item uses the name.
    async fn unique_path(&self, path: &Path) -> Result<PathBuf> {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

        let mut n: u32 = 1;
        loop {
            let name = match &extension {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            let candidate = parent.join(name);
            if !self.is_taken(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

impl std::fmt::Debug for DuplicateSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateSession").finish_non_exhaustive()
    }
}

/// Decide the final output path for `path` and reserve it in `session`.
///
/// A path another item of the session is still writing counts as taken, the
/// same as a file on disk.
pub async fn handle_existing_path(
    path: &Path,
    base: &str,
    policy: DuplicatePolicy,
    session: &DuplicateSession,
) -> Result<PathResolution> {
    // Held across the check, the prompt and the reservation so concurrent
    // items neither pick the same name nor ask twice.
    let mut decision = session.decision.lock().await;

    let in_flight = session.is_reserved(path);
    if !in_flight && !path_exists(path).await? {
        return Ok(session.reserve(path.to_path_buf()));
    }

    let choice = if let Some(held) = *decision {
        debug!(path = %path.display(), decision = ?held, "Applying session-wide decision");
        DuplicateChoice::from(held)
    } else {
        match policy {
            DuplicatePolicy::Skip => DuplicateChoice::Skip,
            DuplicatePolicy::Overwrite => DuplicateChoice::Overwrite,
            DuplicatePolicy::Rename => DuplicateChoice::Rename,
            DuplicatePolicy::Prompt => {
                let answer = session.prompter.ask(path, base).await?;
                if answer.apply_to_all {
                    info!(choice = ?answer.choice, "Remembering choice for the rest of the run");
                    *decision = Some(answer.choice.apply_all());
                }
                answer.choice
            }
        }
    };

    match choice {
        DuplicateChoice::Skip => Ok(PathResolution {
            path: path.to_path_buf(),
            skip: true,
            reservation: None,
        }),
        DuplicateChoice::Overwrite if !in_flight => Ok(session.reserve(path.to_path_buf())),
        DuplicateChoice::Overwrite | DuplicateChoice::Rename => {
            if in_flight {
                debug!(path = %path.display(), "Output is being written by another item");
            }
            let unique = session.unique_path(path).await?;
            Ok(session.reserve(unique))
        }
    }
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| DownloadError::io("checking", path, e))
}

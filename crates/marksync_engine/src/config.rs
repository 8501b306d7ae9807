//! Configuration for the sync engine and queue.

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the sync queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long to coalesce changes after the first enqueue before draining.
    pub debounce: Duration,
    /// Maximum number of dispatches in flight at once.
    pub max_concurrency: usize,
    /// Maximum retries per item before it is parked as failed.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_retry_delay: Duration,
    /// Multiplier applied per retry for exponential backoff.
    pub backoff_multiplier: f64,
    /// Upper bound on a single retry delay.
    pub max_retry_delay: Duration,
    /// Number of recent processing-time samples kept for stats.
    pub sample_window: usize,
}

impl QueueConfig {
    /// Creates a configuration with the defaults.
    pub fn new() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_concurrency: 4,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(60),
            sample_window: 100,
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the concurrency bound.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base retry delay.
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the retry delay cap.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Calculates the backoff delay for an item that has already been
    /// retried `retries` times.
    pub fn retry_delay(&self, retries: u32) -> Duration {
        let delay =
            self.base_retry_delay.as_secs_f64() * self.backoff_multiplier.powi(retries as i32);
        Duration::from_secs_f64(delay.min(self.max_retry_delay.as_secs_f64()))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options controlling batch execution.
///
/// The two-mode design lets callers choose best-effort over a large batch
/// versus all-or-nothing for a small hand-triggered sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Abort the batch at the first failure.
    pub stop_on_error: bool,
    /// When aborting, unwind everything completed so far.
    pub rollback_on_error: bool,
}

/// One folder-to-destination-type pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMapping {
    /// Vault-relative folder, `""` for the vault root.
    pub folder: String,
    /// Destination type id in the remote container.
    pub type_id: String,
}

/// Pairing and mapping configuration for one remote container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// The remote container id.
    pub container_id: String,
    /// Folder pairings, consulted when creating records.
    pub folders: Vec<FolderMapping>,
    /// Tag name to remote tag id mapping.
    pub tags: HashMap<String, String>,
}

impl ContainerConfig {
    /// Creates a configuration for a container.
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            folders: Vec::new(),
            tags: HashMap::new(),
        }
    }

    /// Adds a folder pairing.
    pub fn with_folder(mut self, folder: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.folders.push(FolderMapping {
            folder: folder.into(),
            type_id: type_id.into(),
        });
        self
    }

    /// Adds a tag mapping.
    pub fn with_tag(mut self, name: impl Into<String>, tag_id: impl Into<String>) -> Self {
        self.tags.insert(name.into(), tag_id.into());
        self
    }

    /// Resolves the destination type for a document folder.
    ///
    /// An exact folder match always wins; otherwise the longest ancestor
    /// pairing applies.
    pub fn resolve_type_id(&self, folder: &str) -> Option<&str> {
        if let Some(mapping) = self.folders.iter().find(|m| m.folder == folder) {
            return Some(&mapping.type_id);
        }
        self.folders
            .iter()
            .filter(|m| is_ancestor(&m.folder, folder))
            .max_by_key(|m| m.folder.len())
            .map(|m| m.type_id.as_str())
    }

    /// Resolves declared tag names to remote tag ids.
    ///
    /// Unmapped tags are kept as-is, silently unresolved.
    pub fn resolve_tags(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|name| self.tags.get(name).unwrap_or(name).clone())
            .collect()
    }
}

fn is_ancestor(ancestor: &str, folder: &str) -> bool {
    ancestor.is_empty() || folder.starts_with(&format!("{ancestor}/"))
}

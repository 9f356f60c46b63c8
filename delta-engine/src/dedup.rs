//! Bounded memory of recently processed comments, plus the persisted cursor.

use deltabot_core::CoreError;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEDUP_CAPACITY: usize = 10;
pub const RESET_EVERY_CYCLES: u32 = 10;

const NO_CURSOR: &str = "None";

/// Insertion-ordered, fixed capacity; the oldest id is evicted on overflow.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    items: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, id: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(id.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item == id)
    }

    pub fn latest(&self) -> Option<&str> {
        self.items.back().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

/// Orders fullnames by their base-36 id: longer ids are newer.
pub fn compare_fullnames(a: &str, b: &str) -> Ordering {
    let id = |name: &str| -> String {
        name.split_once('_')
            .map(|(_, id)| id)
            .unwrap_or(name)
            .to_ascii_lowercase()
    };
    let (a, b) = (id(a), id(b));
    a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
}

/// Reads the saved cursor. A missing or unreadable file means no cursor.
pub async fn read_saved_id(path: &Path) -> Option<String> {
    debug!("Reading ID from file {}", path.display());
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let id = text.lines().next().unwrap_or_default().trim();
    if id.is_empty() || id == NO_CURSOR {
        None
    } else {
        Some(id.to_string())
    }
}

pub async fn write_saved_id(path: &Path, id: Option<&str>) -> Result<(), CoreError> {
    debug!("Saving ID {:?} to file {}", id, path.display());
    tokio::fs::write(path, id.unwrap_or(NO_CURSOR)).await?;
    Ok(())
}

/// Per-process cycle state: the dedup window, the amnesty counter, and the
/// cursor file.
#[derive(Debug)]
pub struct CycleTracker {
    window: DedupWindow,
    cycles: u32,
    reset_every: u32,
    cursor_path: PathBuf,
}

impl CycleTracker {
    pub fn new(cursor_path: impl Into<PathBuf>) -> Self {
        Self {
            window: DedupWindow::default(),
            cycles: 0,
            reset_every: RESET_EVERY_CYCLES,
            cursor_path: cursor_path.into(),
        }
    }

    /// Seeds the window from the saved cursor, if any.
    pub async fn load(cursor_path: impl Into<PathBuf>) -> Self {
        let mut tracker = Self::new(cursor_path);
        if let Some(id) = read_saved_id(&tracker.cursor_path).await {
            info!("Resuming after {}", id);
            tracker.window.push(id);
        }
        tracker
    }

    pub fn window(&self) -> &DedupWindow {
        &self.window
    }

    pub fn latest(&self) -> Option<String> {
        self.window.latest().map(str::to_string)
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn has_seen(&self, fullname: &str) -> bool {
        self.window.contains(fullname)
    }

    /// Remembers a processed comment. Only ids newer than the latest one move
    /// the window forward.
    pub fn record(&mut self, fullname: &str) {
        let newer = match self.window.latest() {
            None => true,
            Some(latest) => compare_fullnames(fullname, latest) == Ordering::Greater,
        };
        if newer {
            self.window.push(fullname);
        }
    }

    pub fn reset(&mut self) {
        info!("Clearing processed comment history");
        self.window.clear();
    }

    /// Persists the cursor if it moved since `started_at`, then counts the
    /// cycle. Every `RESET_EVERY_CYCLES` cycles the window is cleared.
    /// Returns whether the cursor was written.
    pub async fn finish_cycle(&mut self, started_at: Option<&str>) -> Result<bool, CoreError> {
        let latest = self.latest();
        let mut persisted = false;
        if let Some(latest) = latest.as_deref() {
            if Some(latest) != started_at {
                write_saved_id(&self.cursor_path, Some(latest)).await?;
                persisted = true;
            }
        }
        self.count_cycle();
        Ok(persisted)
    }

    fn count_cycle(&mut self) {
        self.cycles += 1;
        info!(
            "Reset counter at {}. When this reaches {}, the history is cleared.",
            self.cycles, self.reset_every
        );
        if self.cycles >= self.reset_every {
            self.window.clear();
            self.cycles = 0;
        }
    }
}

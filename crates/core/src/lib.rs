#![forbid(unsafe_code)]

pub mod background;
pub mod batch;
pub mod coordinator;
pub mod file_ops;
pub mod jobs;
pub mod playback;
pub mod process_backend;
pub mod settings;
pub mod settings_io;
pub mod signal;
pub mod status;
pub mod transform;

mod orchestration;

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::SystemTime;

pub use background::{BackgroundEvent, FfprobeProbe, MetadataProbe};
pub use batch::{BatchId, BatchTag, BatchTracker, FollowUp};
pub use coordinator::Coordinator;
pub use file_ops::{
    DeferredDeletes, MoveOutcome, UpscaleOptions, UpscaleProfile, UpscaleTarget, UpscaleTicket,
};
pub use jobs::{
    InternalCode, ResultCode, SurfaceLog, TASK_CANCELED_MESSAGE, TaskCompletion, TaskEvent,
    TaskFamily, TaskId, TaskKind, TaskRegistry, TaskRequest, TaskSnapshot, TransferMode,
};
pub use orchestration::{StartError, StartOptions};
pub use playback::{MediaEngine, NullEngine, PlaybackSession, PostAction};
pub use settings::{LibrarySettings, Settings};
pub use signal::{CancellationToken, Generation, GenerationCounter, GenerationGuard};
pub use status::{CANCELLING_SUFFIX, StatusAction, StatusHandle, StatusMessage, StatusTracker};
pub use transform::{FinalizeReport, TransformOp};

/// Everything a worker or the media host can tell the coordinator.
#[derive(Debug)]
pub enum Event {
    Task(TaskEvent),
    Background(BackgroundEvent),
    Status(StatusMessage),
    /// The media engine reached the end of the current item.
    EndReached,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MediaMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Seconds.
    pub duration: Option<f64>,
}

impl MediaMeta {
    fn pixels(&self) -> Option<u64> {
        Some(u64::from(self.width?) * u64::from(self.height?))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub meta: Option<MediaMeta>,
}

impl FileEntry {
    fn extension(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((_, extension)) if !self.is_dir => extension.to_lowercase(),
            _ => String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortField {
    Name,
    Type,
    Size,
    Modified,
    Resolution,
    Duration,
}

impl SortField {
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Type => "type",
            Self::Size => "size",
            Self::Modified => "mtime",
            Self::Resolution => "resolution",
            Self::Duration => "duration",
        }
    }

    /// Fields that only become meaningful after metadata enrichment.
    pub fn needs_metadata(self) -> bool {
        matches!(self, Self::Resolution | Self::Duration)
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "type" | "ext" => Ok(Self::Type),
            "size" => Ok(Self::Size),
            "mtime" | "modified" | "date" => Ok(Self::Modified),
            "resolution" | "res" => Ok(Self::Resolution),
            "duration" | "length" => Ok(Self::Duration),
            other => Err(format!("unknown sort field '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SortMode {
    pub field: SortField,
    pub reverse: bool,
}

impl Default for SortMode {
    fn default() -> Self {
        Self {
            field: SortField::Name,
            reverse: false,
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.field.label())?;
        if self.reverse {
            formatter.write_str(" (desc)")?;
        }
        Ok(())
    }
}

/// Lists `dir`: sub-directories plus files with a known media extension.
/// Returns `Ok(None)` when `guard` goes stale part-way through.
pub fn read_entries(
    dir: &Path,
    sort: SortMode,
    library: &LibrarySettings,
    guard: Option<&GenerationGuard>,
) -> io::Result<Option<Vec<FileEntry>>> {
    let mut entries = Vec::new();
    for entry_result in fs::read_dir(dir)? {
        if guard.is_some_and(GenerationGuard::is_stale) {
            return Ok(None);
        }
        let entry = entry_result?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let is_dir = file_type.is_dir();
        if !is_dir && !library.is_media_name(&name) {
            continue;
        }
        let metadata = entry.metadata().ok();
        entries.push(FileEntry {
            name,
            path: entry.path(),
            is_dir,
            size: metadata.as_ref().map_or(0, fs::Metadata::len),
            modified: metadata.as_ref().and_then(|meta| meta.modified().ok()),
            meta: None,
        });
    }
    sort_entries(&mut entries, sort);
    Ok(Some(entries))
}

/// Directories first; ties fall back to case-insensitive name.
pub fn sort_entries(entries: &mut [FileEntry], sort: SortMode) {
    entries.sort_by(|left, right| {
        let dir_order = right.is_dir.cmp(&left.is_dir);
        if dir_order != Ordering::Equal {
            return dir_order;
        }

        let by_name = || left.name.to_lowercase().cmp(&right.name.to_lowercase());
        let mut order = match sort.field {
            SortField::Name => by_name(),
            SortField::Type => left.extension().cmp(&right.extension()).then_with(by_name),
            SortField::Size => left.size.cmp(&right.size).then_with(by_name),
            SortField::Modified => left.modified.cmp(&right.modified).then_with(by_name),
            SortField::Resolution => left
                .meta
                .and_then(|meta| meta.pixels())
                .cmp(&right.meta.and_then(|meta| meta.pixels()))
                .then_with(by_name),
            SortField::Duration => {
                let left_duration = left.meta.and_then(|meta| meta.duration).unwrap_or(-1.0);
                let right_duration = right.meta.and_then(|meta| meta.duration).unwrap_or(-1.0);
                left_duration.total_cmp(&right_duration).then_with(by_name)
            }
        };
        if sort.reverse {
            order = order.reverse();
        }
        order
    });
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViewMode {
    Folder,
    Playback,
}

/// Canonical state. Owned and mutated only by the coordinator thread.
#[derive(Debug)]
pub struct AppState {
    pub settings: Settings,
    pub folder: PathBuf,
    pub view: ViewMode,
    pub entries: Vec<FileEntry>,
    pub sort: SortMode,
    pub title: String,
    pub loading: bool,
    pub status: StatusTracker,
    pub batches: BatchTracker,
    tasks: Arc<TaskRegistry>,
    listing_generation: GenerationCounter,
    metadata_generation: GenerationCounter,
    metadata_pending: bool,
    session: CancellationToken,
    event_tx: Sender<Event>,
    next_task_id: u64,
    probe: Option<Arc<dyn MetadataProbe>>,
    engine: Box<dyn MediaEngine>,
    playback: Option<PlaybackSession>,
    exit_requested: bool,
    pending_finalize: Vec<PathBuf>,
    deferred: Option<DeferredDeletes>,
}

impl AppState {
    pub fn new(
        folder: PathBuf,
        settings: Settings,
        event_tx: Sender<Event>,
        engine: Box<dyn MediaEngine>,
        probe: Option<Arc<dyn MetadataProbe>>,
    ) -> Self {
        let deferred = settings
            .deferred_deletes_journal()
            .map(DeferredDeletes::new);
        let title = folder.to_string_lossy().into_owned();
        Self {
            settings,
            folder,
            view: ViewMode::Folder,
            entries: Vec::new(),
            sort: SortMode::default(),
            title,
            loading: false,
            status: StatusTracker::new(),
            batches: BatchTracker::new(),
            tasks: Arc::new(TaskRegistry::new()),
            listing_generation: GenerationCounter::new(),
            metadata_generation: GenerationCounter::new(),
            metadata_pending: false,
            session: CancellationToken::new(),
            event_tx,
            next_task_id: 1,
            probe,
            engine,
            playback: None,
            exit_requested: false,
            pending_finalize: Vec::new(),
            deferred,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn status_text(&self) -> String {
        self.status.text()
    }

    pub fn listing_generation(&self) -> Generation {
        self.listing_generation.current()
    }

    pub fn metadata_generation(&self) -> Generation {
        self.metadata_generation.current()
    }

    pub fn is_enriching(&self) -> bool {
        self.metadata_pending
    }

    pub fn playback(&self) -> Option<&PlaybackSession> {
        self.playback.as_ref()
    }

    pub fn engine(&self) -> &dyn MediaEngine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn MediaEngine {
        self.engine.as_mut()
    }

    pub fn deferred_deletes(&self) -> Option<&DeferredDeletes> {
        self.deferred.as_ref()
    }

    /// Results of successful transforms still waiting in their working
    /// directories.
    pub fn pending_finalize(&self) -> &[PathBuf] {
        &self.pending_finalize
    }

    pub fn event_sender(&self) -> Sender<Event> {
        self.event_tx.clone()
    }

    /// Cancels every running task and background stream.
    pub fn shutdown(&mut self) {
        self.listing_generation.advance();
        self.metadata_generation.advance();
        self.session.cancel();
        tracing::info!(
            task_event = "shutdown",
            active = self.tasks.active_count(),
            "cancelling outstanding work"
        );
    }
}

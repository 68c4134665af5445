use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::Serialize;

use crate::CancellationToken;
use crate::jobs::{
    InternalCode, ResultCode, TaskEnvironment, TaskOutput, TransferMode, canceled_error,
    display_name,
};

pub const PARTIAL_SUFFIX: &str = ".mxpart";
const MAX_UNIQUE_SUFFIX: u32 = 9999;
const MIN_CHUNK_BYTES: usize = 4096;

/// First free name in `directory`: `name.ext`, then `name (1).ext` up to
/// `name (9999).ext`.
pub fn unique_name(directory: &Path, file_name: &OsStr) -> io::Result<PathBuf> {
    let candidate = directory.join(file_name);
    if !path_exists(&candidate) {
        return Ok(candidate);
    }
    let (stem, extension) = split_name(file_name);
    for counter in 1..=MAX_UNIQUE_SUFFIX {
        let candidate = directory.join(format!("{stem} ({counter}){extension}"));
        if !path_exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free name for {} in {}",
            file_name.to_string_lossy(),
            directory.to_string_lossy()
        ),
    ))
}

pub(crate) fn split_name(file_name: &OsStr) -> (String, String) {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!("{name}{PARTIAL_SUFFIX}"))
}

/// Copies one file through a sibling `.mxpart` file that is renamed into
/// place only after the last chunk. On any failure, including cancellation,
/// the partial file is removed and `destination` is left untouched.
pub fn copy_file_cancelable(
    source: &Path,
    destination: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> io::Result<u64> {
    let partial = partial_path(destination);
    let copied = match write_partial(source, &partial, chunk_bytes, cancel) {
        Ok(copied) => copied,
        Err(error) => {
            let _ = fs::remove_file(&partial);
            return Err(error);
        }
    };
    if let Err(error) = fs::rename(&partial, destination) {
        let _ = fs::remove_file(&partial);
        return Err(error);
    }
    if let Ok(metadata) = fs::metadata(source) {
        let modified = FileTime::from_last_modification_time(&metadata);
        if let Err(error) = filetime::set_file_mtime(destination, modified) {
            tracing::debug!(
                path = %destination.to_string_lossy(),
                %error,
                "could not preserve modification time"
            );
        }
    }
    Ok(copied)
}

fn write_partial(
    source: &Path,
    partial: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let permissions = reader.metadata()?.permissions();
    let mut writer = File::create(partial)?;
    let copied = copy_chunks(&mut reader, &mut writer, chunk_bytes, cancel)?;
    writer.sync_all()?;
    fs::set_permissions(partial, permissions)?;
    Ok(copied)
}

fn copy_chunks(
    reader: &mut impl Read,
    writer: &mut impl Write,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> io::Result<u64> {
    let mut buffer = vec![0_u8; chunk_bytes.max(MIN_CHUNK_BYTES)];
    let mut copied = 0_u64;
    loop {
        if cancel.is_cancelled() {
            return Err(canceled_error());
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    writer.flush()?;
    Ok(copied)
}

/// Files go through [`copy_file_cancelable`]; directories are copied
/// recursively and removed again if the copy does not finish.
pub fn copy_path_cancelable(
    source: &Path,
    destination: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let metadata = fs::symlink_metadata(source)?;
    if metadata.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("symlink copy is not supported: {}", source.to_string_lossy()),
        ));
    }
    if !metadata.is_dir() {
        return copy_file_cancelable(source, destination, chunk_bytes, cancel).map(|_| ());
    }

    if destination.starts_with(source) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "cannot copy directory into itself: {} -> {}",
                source.to_string_lossy(),
                destination.to_string_lossy()
            ),
        ));
    }
    fs::create_dir(destination)?;
    let result = copy_dir_contents(source, destination, chunk_bytes, cancel);
    if result.is_err() {
        let _ = fs::remove_dir_all(destination);
    }
    result
}

fn copy_dir_contents(
    source: &Path,
    destination: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> io::Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_path_cancelable(
            &entry.path(),
            &destination.join(entry.file_name()),
            chunk_bytes,
            cancel,
        )?;
    }
    Ok(())
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Removes the files directly inside `directory`, then the directory itself.
/// Subdirectories are left alone, so a non-empty directory survives.
pub fn remove_dir_shallow(directory: &Path) -> io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
        }
    }
    fs::remove_dir(directory)
}

pub fn is_cross_device_error(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices || error.raw_os_error() == Some(18)
}

#[derive(Debug, Eq, PartialEq)]
pub enum MoveOutcome {
    Renamed,
    Copied,
    /// Copied, but the source could not be removed and was journalled.
    CopiedSourceDeferred,
}

pub fn move_path(
    source: &Path,
    destination: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    deferred: Option<&DeferredDeletes>,
) -> io::Result<MoveOutcome> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(MoveOutcome::Renamed),
        Err(error) if is_cross_device_error(&error) => {
            move_by_copy(source, destination, chunk_bytes, cancel, deferred)
        }
        Err(error) => Err(error),
    }
}

/// Cross-volume move. The source is only touched after the copy finished.
pub fn move_by_copy(
    source: &Path,
    destination: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
    deferred: Option<&DeferredDeletes>,
) -> io::Result<MoveOutcome> {
    copy_path_cancelable(source, destination, chunk_bytes, cancel)?;
    match remove_path(source) {
        Ok(()) => Ok(MoveOutcome::Copied),
        Err(error) => match deferred {
            Some(journal) => {
                journal.schedule(source)?;
                tracing::warn!(
                    path = %source.to_string_lossy(),
                    %error,
                    "moved source could not be removed; deferred"
                );
                Ok(MoveOutcome::CopiedSourceDeferred)
            }
            None => Err(error),
        },
    }
}

/// Journal of paths that could not be deleted, retried on the next start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeferredDeletes {
    journal: PathBuf,
}

impl DeferredDeletes {
    pub fn new(journal: PathBuf) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> &Path {
        &self.journal
    }

    pub fn schedule(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = self.journal.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal)?;
        let line = format!("{}\n", path.to_string_lossy());
        file.write_all(line.as_bytes())
    }

    pub fn pending(&self) -> io::Result<Vec<PathBuf>> {
        let source = match fs::read_to_string(&self.journal) {
            Ok(source) => source,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        Ok(source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Retries every journalled delete once and clears the journal.
    /// Returns the number of paths that are gone afterwards.
    pub fn purge(&self) -> io::Result<usize> {
        let pending = self.pending()?;
        let mut removed = 0;
        for path in &pending {
            match remove_path(path) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == io::ErrorKind::NotFound => removed += 1,
                Err(error) => tracing::warn!(
                    path = %path.to_string_lossy(),
                    %error,
                    "deferred delete failed again"
                ),
            }
        }
        match fs::remove_file(&self.journal) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), removed, "purged deferred deletes");
        }
        Ok(removed)
    }
}

fn report_failure(output: &mut TaskOutput, path: &Path, error: io::Error) -> ResultCode {
    let message = error.to_string();
    let code = ResultCode::from(error);
    if code.is_canceled() {
        output.emit("Canceled.");
    } else {
        output.emit(format!("ERROR: {}: {message}", path.to_string_lossy()));
    }
    code
}

fn missing_path(output: &mut TaskOutput, what: &str, path: &Path) -> ResultCode {
    output.emit(format!("ERROR: {what} is missing: {}", path.to_string_lossy()));
    ResultCode::Internal(InternalCode::MissingPath)
}

fn check_canceled(output: &mut TaskOutput) -> Result<(), ResultCode> {
    if output.is_canceled() {
        output.emit("Canceled.");
        return Err(ResultCode::Canceled);
    }
    Ok(())
}

pub(crate) fn run_transfer(
    mode: TransferMode,
    sources: &[PathBuf],
    destination_dir: &Path,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<(), ResultCode> {
    if !destination_dir.is_dir() {
        return Err(missing_path(output, "destination folder", destination_dir));
    }
    let verb = match mode {
        TransferMode::Copy => "Copy",
        TransferMode::Move => "Move",
    };
    let cancel = output.cancel_token().clone();
    let total = sources.len();

    for (index, source) in sources.iter().enumerate() {
        check_canceled(output)?;
        let Some(name) = source.file_name() else {
            return Err(missing_path(output, "source name", source));
        };
        if mode == TransferMode::Move && source.parent() == Some(destination_dir) {
            output.emit(format!("skip {}: already in destination", source.to_string_lossy()));
            continue;
        }
        output.progress(format!("{verb} {} ({}/{total})", display_name(source), index + 1));

        let destination =
            unique_name(destination_dir, name).map_err(|error| report_failure(output, source, error))?;
        output.emit(format!(
            "{} {} -> {}",
            verb.to_ascii_lowercase(),
            source.to_string_lossy(),
            destination.to_string_lossy()
        ));

        let result = match mode {
            TransferMode::Copy => {
                copy_path_cancelable(source, &destination, environment.copy_chunk_bytes, &cancel)
            }
            TransferMode::Move => move_path(
                source,
                &destination,
                environment.copy_chunk_bytes,
                &cancel,
                environment.deferred_deletes.as_ref(),
            )
            .map(|outcome| {
                if outcome == MoveOutcome::CopiedSourceDeferred {
                    output.emit("  source is locked; it will be removed at next start");
                }
            }),
        };
        result.map_err(|error| report_failure(output, source, error))?;
    }

    output.emit(format!("Done: {total} item(s)."));
    Ok(())
}

pub(crate) fn run_delete(
    targets: &[PathBuf],
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<(), ResultCode> {
    let total = targets.len();
    for (index, target) in targets.iter().enumerate() {
        check_canceled(output)?;
        output.progress(format!("Delete {} ({}/{total})", display_name(target), index + 1));
        output.emit(format!("delete {}", target.to_string_lossy()));

        let error = match remove_path(target) {
            Ok(()) => continue,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                output.emit("  already gone");
                continue;
            }
            Err(error) => error,
        };
        let Some(journal) = environment.deferred_deletes.as_ref() else {
            return Err(report_failure(output, target, error));
        };
        if let Err(journal_error) = journal.schedule(target) {
            tracing::warn!(%journal_error, "deferred delete journal is unavailable");
            return Err(report_failure(output, target, error));
        }
        output.emit(format!("  could not delete now ({error}); scheduled for next start"));
    }
    output.emit(format!("Done: {total} item(s)."));
    Ok(())
}

pub(crate) fn run_copy_to_path(
    source: &Path,
    destination: &Path,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<PathBuf, ResultCode> {
    if !source.is_file() {
        return Err(missing_path(output, "source", source));
    }
    let (Some(parent), Some(name)) = (destination.parent(), destination.file_name()) else {
        return Err(missing_path(output, "destination", destination));
    };
    if !parent.is_dir() {
        return Err(missing_path(output, "destination folder", parent));
    }
    check_canceled(output)?;

    let target = unique_name(parent, name).map_err(|error| report_failure(output, source, error))?;
    output.emit(format!(
        "copy {} -> {}",
        source.to_string_lossy(),
        target.to_string_lossy()
    ));
    let cancel = output.cancel_token().clone();
    copy_file_cancelable(source, &target, environment.copy_chunk_bytes, &cancel)
        .map_err(|error| report_failure(output, source, error))?;
    output.emit("Done.");
    Ok(target)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum UpscaleTarget {
    #[default]
    #[serde(rename = "4k")]
    Uhd4k,
    #[serde(rename = "8k")]
    Uhd8k,
}

impl UpscaleTarget {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Uhd4k => (3840, 2160),
            Self::Uhd8k => (7680, 4320),
        }
    }
}

impl FromStr for UpscaleTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "4k" => Ok(Self::Uhd4k),
            "8k" => Ok(Self::Uhd8k),
            other => Err(format!("unknown upscale target '{other}' (expected 4k or 8k)")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpscaleProfile {
    #[default]
    General,
    Repair,
    Stabilize,
    Deblur,
    Denoise,
    DeinterlaceRepair,
    #[serde(rename = "repair_2pass")]
    Repair2Pass,
    GeneralGrain,
    RepairGrain,
}

impl UpscaleProfile {
    pub const ALL: [Self; 9] = [
        Self::General,
        Self::Repair,
        Self::Stabilize,
        Self::Deblur,
        Self::Denoise,
        Self::DeinterlaceRepair,
        Self::Repair2Pass,
        Self::GeneralGrain,
        Self::RepairGrain,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Repair => "repair",
            Self::Stabilize => "stabilize",
            Self::Deblur => "deblur",
            Self::Denoise => "denoise",
            Self::DeinterlaceRepair => "deinterlace_repair",
            Self::Repair2Pass => "repair_2pass",
            Self::GeneralGrain => "general_grain",
            Self::RepairGrain => "repair_grain",
        }
    }
}

impl fmt::Display for UpscaleProfile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

impl FromStr for UpscaleProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|profile| profile.label() == value)
            .ok_or_else(|| format!("unknown upscale profile '{value}'"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpscaleOptions {
    pub target: UpscaleTarget,
    pub profile: UpscaleProfile,
    /// Film grain strength; 0 disables it.
    pub grain: f64,
    pub grain_size: u32,
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            target: UpscaleTarget::Uhd4k,
            profile: UpscaleProfile::General,
            grain: 0.0,
            grain_size: 1,
        }
    }
}

/// JSON ticket published next to a queued video.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpscaleTicket {
    pub job_version: u32,
    pub submitted_utc: String,
    pub source_original: String,
    pub input_file: String,
    pub target: UpscaleTarget,
    pub target_w: u32,
    pub target_h: u32,
    pub profile: UpscaleProfile,
    pub grain: f64,
    pub gsize: u32,
}

impl UpscaleTicket {
    pub fn new(
        source: &Path,
        input_file: &str,
        options: UpscaleOptions,
        submitted: DateTime<Utc>,
    ) -> Self {
        let (target_w, target_h) = options.target.dimensions();
        Self {
            job_version: 1,
            submitted_utc: submitted.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            source_original: source.to_string_lossy().into_owned(),
            input_file: input_file.to_string(),
            target: options.target,
            target_w,
            target_h,
            profile: options.profile,
            grain: options.grain,
            gsize: options.grain_size,
        }
    }

    pub fn render(&self) -> serde_json::Result<String> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        Ok(body)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct QueueSlot {
    pub video: PathBuf,
    pub ticket: PathBuf,
    pub partial_ticket: PathBuf,
}

/// Picks a base name for which the video, the ticket and the unpublished
/// ticket are all free, bumping `name (n)` for the three together.
pub fn queue_slot(queue_dir: &Path, source: &Path) -> io::Result<QueueSlot> {
    let Some(file_name) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source has no file name: {}", source.to_string_lossy()),
        ));
    };
    let (stem, extension) = split_name(file_name);
    for counter in 0..=MAX_UNIQUE_SUFFIX {
        let base = if counter == 0 {
            stem.clone()
        } else {
            format!("{stem} ({counter})")
        };
        let slot = QueueSlot {
            video: queue_dir.join(format!("{base}{extension}")),
            ticket: queue_dir.join(format!("{base}.json")),
            partial_ticket: queue_dir.join(format!("{base}._json")),
        };
        if !path_exists(&slot.video) && !path_exists(&slot.ticket) && !path_exists(&slot.partial_ticket)
        {
            return Ok(slot);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free queue name for {}", source.to_string_lossy()),
    ))
}

fn publish_ticket(slot: &QueueSlot, body: &str, output: &mut TaskOutput) -> Result<(), ResultCode> {
    let mut file = match File::create(&slot.partial_ticket) {
        Ok(file) => file,
        Err(error) => {
            output.emit(format!("ERROR: failed to create job ._json file: {error}"));
            return Err(ResultCode::Internal(InternalCode::TicketCreate));
        }
    };
    if let Err(error) = file
        .write_all(body.as_bytes())
        .and_then(|()| file.sync_all())
    {
        drop(file);
        let _ = fs::remove_file(&slot.partial_ticket);
        output.emit(format!("ERROR: failed to write job ._json file: {error}"));
        return Err(ResultCode::Internal(InternalCode::TicketWrite));
    }
    drop(file);
    if let Err(error) = fs::rename(&slot.partial_ticket, &slot.ticket) {
        output.emit(format!("ERROR: failed to publish job json: {error}"));
        return Err(ResultCode::Internal(InternalCode::TicketPublish));
    }
    Ok(())
}

pub(crate) fn run_queue_submit(
    sources: &[PathBuf],
    queue_dir: &Path,
    options: UpscaleOptions,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<(), ResultCode> {
    if !queue_dir.is_dir() {
        return Err(missing_path(output, "upscale queue folder", queue_dir));
    }
    let cancel = output.cancel_token().clone();
    let total = sources.len();

    for (index, source) in sources.iter().enumerate() {
        check_canceled(output)?;
        if !source.is_file() {
            return Err(missing_path(output, "source", source));
        }
        output.progress(format!("Submit {} ({}/{total})", display_name(source), index + 1));

        let slot = queue_slot(queue_dir, source).map_err(|error| report_failure(output, source, error))?;
        output.emit(format!(
            "copy {} -> {}",
            source.to_string_lossy(),
            slot.video.to_string_lossy()
        ));
        copy_file_cancelable(source, &slot.video, environment.copy_chunk_bytes, &cancel)
            .map_err(|error| report_failure(output, source, error))?;

        let input_file = display_name(&slot.video);
        let ticket = UpscaleTicket::new(source, &input_file, options, Utc::now());
        let body = match ticket.render() {
            Ok(body) => body,
            Err(error) => {
                output.emit(format!("ERROR: failed to encode job json: {error}"));
                return Err(ResultCode::Internal(InternalCode::TicketWrite));
            }
        };
        publish_ticket(&slot, &body, output)?;
        output.emit(format!(
            "queued {} ({}, {})",
            slot.ticket.to_string_lossy(),
            options.profile,
            ticket.target_w
        ));
    }
    output.emit(format!("Done: {total} video(s) submitted."));
    Ok(())
}

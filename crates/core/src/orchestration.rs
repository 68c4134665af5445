use crate::background::{spawn_listing, spawn_metadata};
use crate::file_ops::{is_cross_device_error, unique_name};
use crate::jobs::{TaskEnvironment, TaskOutput, TaskRecord, spawn_task};
use crate::transform::finalize_transforms;
use crate::*;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StartOptions {
    /// Route output lines to a live surface instead of the task buffer.
    pub attach_surface: bool,
    pub batch: Option<BatchTag>,
}

/// A task refused before any thread was spawned.
#[derive(Debug)]
pub enum StartError {
    NothingToDo,
    MissingSource(PathBuf),
    MissingDestination(PathBuf),
    QueueNotConfigured,
    UpscaleDirectoryNotConfigured,
    ToolDisabled(&'static str),
    TooFewInputs(usize),
    NotInPlayback,
    Io(io::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToDo => formatter.write_str("nothing selected"),
            Self::MissingSource(path) => {
                write!(formatter, "source is missing: {}", path.to_string_lossy())
            }
            Self::MissingDestination(path) => {
                write!(formatter, "destination is missing: {}", path.to_string_lossy())
            }
            Self::QueueNotConfigured => formatter.write_str("upscale queue is not configured"),
            Self::UpscaleDirectoryNotConfigured => {
                formatter.write_str("upscale directory is not configured")
            }
            Self::ToolDisabled(tool) => write!(formatter, "{tool} is not enabled in settings"),
            Self::TooFewInputs(count) => {
                write!(formatter, "combine needs at least two videos, got {count}")
            }
            Self::NotInPlayback => formatter.write_str("no playback session"),
            Self::Io(error) => write!(formatter, "{error}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for StartError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl AppState {
    fn check_preconditions(&self, request: &TaskRequest) -> Result<(), StartError> {
        let ffmpeg_enabled = || {
            if self.settings.tools.ffmpeg_enabled {
                Ok(())
            } else {
                Err(StartError::ToolDisabled("ffmpeg"))
            }
        };
        match request {
            TaskRequest::Transfer {
                sources,
                destination_dir,
                ..
            } => {
                if sources.is_empty() {
                    return Err(StartError::NothingToDo);
                }
                if !destination_dir.is_dir() {
                    return Err(StartError::MissingDestination(destination_dir.clone()));
                }
            }
            TaskRequest::Delete { targets } => {
                if targets.is_empty() {
                    return Err(StartError::NothingToDo);
                }
            }
            TaskRequest::CopyToPath {
                source,
                destination,
            } => {
                if !source.is_file() {
                    return Err(StartError::MissingSource(source.clone()));
                }
                if !destination.parent().is_some_and(Path::is_dir) {
                    return Err(StartError::MissingDestination(destination.clone()));
                }
            }
            TaskRequest::Transform { source, .. } => {
                ffmpeg_enabled()?;
                if !source.is_file() {
                    return Err(StartError::MissingSource(source.clone()));
                }
            }
            TaskRequest::Combine { sources, .. } => {
                ffmpeg_enabled()?;
                if sources.len() < 2 {
                    return Err(StartError::TooFewInputs(sources.len()));
                }
            }
            TaskRequest::QueueSubmit {
                sources, queue_dir, ..
            } => {
                if sources.is_empty() {
                    return Err(StartError::NothingToDo);
                }
                if !queue_dir.is_dir() {
                    return Err(StartError::MissingDestination(queue_dir.clone()));
                }
            }
        }
        Ok(())
    }

    fn task_environment(&self) -> TaskEnvironment {
        TaskEnvironment {
            ffmpeg: self.settings.tools.ffmpeg_path.clone(),
            copy_chunk_bytes: self.settings.tasks.copy_chunk_bytes,
            deferred_deletes: self.deferred.clone(),
        }
    }

    /// Registers the task, begins its status operation and spawns its worker.
    pub fn start_task(
        &mut self,
        request: TaskRequest,
        options: StartOptions,
    ) -> Result<TaskId, StartError> {
        self.check_preconditions(&request)?;

        let id = TaskId(self.next_task_id);
        self.next_task_id = self.next_task_id.saturating_add(1);
        let kind = request.kind();
        let status_id = self.status.begin(request.status_label());
        let cancel = self.session.child_token();
        let output = TaskOutput::new(
            id,
            self.event_tx.clone(),
            cancel.clone(),
            self.status.handle(self.event_tx.clone()),
            status_id,
            options.batch,
            options.attach_surface,
            self.settings.tasks.output_buffer_limit,
        );
        let summary = request.summary();
        self.tasks.insert(TaskRecord::new(
            id,
            &request,
            status_id,
            options.batch,
            cancel,
            options.attach_surface,
        ));

        match spawn_task(request, output, self.task_environment()) {
            Ok(handle) => {
                self.tasks.update(id, |record| record.attach_handle(handle));
            }
            Err(error) => {
                self.tasks.remove(id);
                self.status.end(status_id);
                tracing::warn!(
                    task_event = "spawn_failed",
                    task_id = %id,
                    task_kind = kind.label(),
                    %error,
                    "worker thread could not be started"
                );
                return Err(StartError::Io(error));
            }
        }

        tracing::info!(
            task_event = "started",
            task_id = %id,
            task_kind = kind.label(),
            summary = %summary,
            "task started"
        );
        Ok(id)
    }

    /// Copies `sources` into the configured upscale queue with a ticket each.
    pub fn submit_to_queue(
        &mut self,
        sources: Vec<PathBuf>,
        options: UpscaleOptions,
    ) -> Result<TaskId, StartError> {
        let queue_dir = self
            .settings
            .queue
            .upscale_queue
            .clone()
            .ok_or(StartError::QueueNotConfigured)?;
        self.start_task(
            TaskRequest::QueueSubmit {
                sources,
                queue_dir,
                options,
            },
            StartOptions::default(),
        )
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Task(TaskEvent::Output { id, line }) => self.append_surface_line(id, &line),
            Event::Task(TaskEvent::Finished(completion)) => self.finish_task(completion),
            Event::Background(BackgroundEvent::ListingReady {
                generation,
                folder,
                sort,
                result,
            }) => self.accept_listing(generation, folder, sort, result),
            Event::Background(BackgroundEvent::MetadataReady {
                generation,
                path,
                meta,
            }) => {
                if !self.metadata_generation.is_current(generation) {
                    tracing::debug!(
                        task_event = "stale_dropped",
                        stream = "metadata",
                        generation = %generation,
                        "dropped stale metadata"
                    );
                    return;
                }
                if let Some(entry) = self.entries.iter_mut().find(|entry| entry.path == path) {
                    entry.meta = Some(meta);
                }
            }
            Event::Background(BackgroundEvent::MetadataFinished { generation }) => {
                if !self.metadata_generation.is_current(generation) {
                    return;
                }
                self.metadata_pending = false;
                if self.sort.field.needs_metadata() {
                    sort_entries(&mut self.entries, self.sort);
                }
            }
            Event::Status(message) => self.status.apply(message),
            Event::EndReached => self.advance_playback(),
        }
    }

    fn append_surface_line(&mut self, id: TaskId, line: &str) {
        let limit = self.settings.tasks.output_buffer_limit;
        self.tasks.update(id, |record| {
            if let Some(surface) = record.surface.as_mut()
                && surface.text.len() + line.len() < limit
            {
                surface.text.push_str(line);
                surface.text.push('\n');
            }
        });
    }

    fn finish_task(&mut self, completion: TaskCompletion) {
        let TaskCompletion {
            id,
            code,
            output,
            artifact,
            batch,
        } = completion;
        let Some(mut record) = self.tasks.remove(id) else {
            tracing::debug!(task_event = "unknown_completion", task_id = %id, "ignored");
            return;
        };
        self.status.end(record.status_id);
        if let Some(handle) = record.take_handle()
            && handle.join().is_err()
        {
            tracing::warn!(task_event = "join_failed", task_id = %id, "worker panicked");
        }
        record.running = false;
        record.done = true;
        record.result = Some(code);
        let task_kind = record.kind.label();
        let elapsed_ms = record.started_at.elapsed().as_millis();

        match code {
            ResultCode::Success => {
                tracing::info!(
                    task_event = "finished",
                    outcome = "succeeded",
                    task_id = %id,
                    task_kind,
                    elapsed_ms,
                    "task finished"
                );
                if record.kind == TaskKind::Transform
                    && let Some(artifact) = artifact
                {
                    self.pending_finalize.push(artifact);
                }
            }
            ResultCode::Canceled => {
                tracing::info!(
                    task_event = "finished",
                    outcome = "canceled",
                    task_id = %id,
                    task_kind,
                    "task canceled"
                );
            }
            failure => {
                tracing::warn!(
                    task_event = "finished",
                    outcome = "failed",
                    task_id = %id,
                    task_kind,
                    code = failure.raw(),
                    error = %failure,
                    "task failed"
                );
                let mut text = record
                    .surface
                    .take()
                    .map(|surface| surface.text)
                    .unwrap_or_default();
                text.push_str(&output);
                record.surface = Some(SurfaceLog {
                    title: format!("{} failed: {failure}", record.summary),
                    text,
                    persistent: true,
                });
                self.tasks.insert(record);
            }
        }

        if let Some(tag) = batch.filter(|tag| tag.counts)
            && let Some(follow_up) = self.batches.complete(tag.batch)
        {
            self.apply_follow_up(follow_up);
        }
    }

    fn apply_follow_up(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::ReloadFolder(target) => {
                let same_folder =
                    self.folder.to_string_lossy() == target.to_string_lossy();
                if self.playback.is_none() && self.view == ViewMode::Folder && same_folder {
                    tracing::debug!(
                        task_event = "follow_up",
                        folder = %target.to_string_lossy(),
                        "reloading folder after batch"
                    );
                    self.request_listing();
                } else {
                    tracing::debug!(
                        task_event = "follow_up_skipped",
                        folder = %target.to_string_lossy(),
                        "view moved on before batch drained"
                    );
                }
            }
        }
    }

    /// Starts a fresh listing of the current folder. Any listing or
    /// enrichment still in flight becomes stale.
    pub fn request_listing(&mut self) -> bool {
        let generation = self.listing_generation.advance();
        self.metadata_generation.advance();
        self.metadata_pending = false;
        self.loading = true;
        let spawned = spawn_listing(
            self.folder.clone(),
            self.sort,
            self.settings.library.clone(),
            self.listing_generation.guard(generation),
            self.event_tx.clone(),
        );
        match spawned {
            Ok(_) => {
                tracing::debug!(
                    task_event = "listing_requested",
                    generation = %generation,
                    folder = %self.folder.to_string_lossy(),
                    "listing requested"
                );
                true
            }
            Err(error) => {
                self.loading = false;
                tracing::warn!(%error, "listing worker could not be started");
                false
            }
        }
    }

    fn accept_listing(
        &mut self,
        generation: Generation,
        folder: PathBuf,
        sort: SortMode,
        result: Result<Vec<FileEntry>, String>,
    ) {
        if !self.listing_generation.is_current(generation)
            || self.view != ViewMode::Folder
            || folder != self.folder
        {
            tracing::debug!(
                task_event = "stale_dropped",
                stream = "listing",
                generation = %generation,
                "dropped stale listing"
            );
            return;
        }
        self.loading = false;
        match result {
            Ok(mut entries) => {
                if sort != self.sort {
                    sort_entries(&mut entries, self.sort);
                }
                self.entries = entries;
                self.start_metadata();
            }
            Err(error) => {
                tracing::warn!(folder = %folder.to_string_lossy(), %error, "listing failed");
                self.entries.clear();
                self.title = format!("{}: {error}", folder.to_string_lossy());
            }
        }
    }

    fn start_metadata(&mut self) {
        let generation = self.metadata_generation.advance();
        let Some(probe) = self.probe.clone() else {
            return;
        };
        let paths: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.path.clone())
            .collect();
        if paths.is_empty() {
            return;
        }
        let spawned = spawn_metadata(
            paths,
            probe,
            self.metadata_generation.guard(generation),
            self.status.handle(self.event_tx.clone()),
            self.event_tx.clone(),
        );
        match spawned {
            Ok(_) => self.metadata_pending = true,
            Err(error) => tracing::warn!(%error, "metadata worker could not be started"),
        }
    }

    pub fn open_folder(&mut self, folder: PathBuf) -> io::Result<()> {
        if !folder.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a folder: {}", folder.to_string_lossy()),
            ));
        }
        self.title = folder.to_string_lossy().into_owned();
        self.folder = folder;
        self.entries.clear();
        self.request_listing();
        Ok(())
    }

    pub fn go_parent(&mut self) -> io::Result<()> {
        let Some(parent) = self.folder.parent().map(Path::to_path_buf) else {
            return Ok(());
        };
        self.open_folder(parent)
    }

    pub fn set_sort(&mut self, sort: SortMode) {
        self.sort = sort;
        sort_entries(&mut self.entries, sort);
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        let Some(status_id) = self.tasks.update(id, |record| record.status_id) else {
            return false;
        };
        if !self.tasks.cancel(id) {
            return false;
        }
        if let Some(label) = self.status.label(status_id).map(str::to_string)
            && !label.ends_with(CANCELLING_SUFFIX)
        {
            self.status.update(status_id, format!("{label}{CANCELLING_SUFFIX}"));
        }
        tracing::info!(task_event = "cancel_requested", task_id = %id, "cancel requested");
        true
    }

    /// Cancels the newest running file operation.
    pub fn cancel_most_recent(&mut self) -> Option<TaskId> {
        let id = self.tasks.newest_running(TaskFamily::FileOps)?;
        self.cancel_task(id).then_some(id)
    }

    /// Drops a failed task and its persistent surface.
    pub fn dismiss_failure(&mut self, id: TaskId) -> bool {
        let failed = self
            .tasks
            .update(id, |record| !record.running)
            .unwrap_or(false);
        failed && self.tasks.remove(id).is_some()
    }

    pub fn enter_playback(&mut self, playlist: Vec<PathBuf>) -> Result<(), StartError> {
        let session =
            PlaybackSession::new(playlist, self.folder.clone()).ok_or(StartError::NothingToDo)?;
        // Results for the folder we are leaving are no longer wanted.
        self.listing_generation.advance();
        self.metadata_generation.advance();
        self.metadata_pending = false;
        self.loading = false;
        self.view = ViewMode::Playback;
        self.playback = Some(session);
        self.exit_requested = false;
        self.play_current()?;
        Ok(())
    }

    fn play_current(&mut self) -> io::Result<()> {
        let Some(session) = self.playback.as_ref() else {
            return Ok(());
        };
        let Some(current) = session.current().map(Path::to_path_buf) else {
            return Ok(());
        };
        let (position, total) = session.position();
        self.title = if total > 1 {
            format!("(Play List {position} of {total}) {}", current.to_string_lossy())
        } else {
            current.to_string_lossy().into_owned()
        };
        self.engine.play(&current)
    }

    fn advance_playback(&mut self) {
        let Some(session) = self.playback.as_mut() else {
            return;
        };
        if !session.advance() {
            self.exit_requested = true;
            return;
        }
        if let Err(error) = self.play_current() {
            tracing::warn!(%error, "playback failed");
        }
    }

    pub fn previous_in_playlist(&mut self) -> io::Result<()> {
        let moved = self
            .playback
            .as_mut()
            .is_some_and(PlaybackSession::previous);
        if moved { self.play_current() } else { Ok(()) }
    }

    /// Set when playback ran out of items; the coordinator then runs the
    /// exit barrier.
    pub fn take_exit_request(&mut self) -> bool {
        std::mem::take(&mut self.exit_requested)
    }

    fn current_item(&self) -> Result<PathBuf, StartError> {
        self.playback
            .as_ref()
            .and_then(PlaybackSession::current)
            .map(Path::to_path_buf)
            .ok_or(StartError::NotInPlayback)
    }

    fn position_secs(&self) -> f64 {
        self.engine.position_ms() as f64 / 1000.0
    }

    pub fn transform_current(&mut self, op: TransformOp) -> Result<TaskId, StartError> {
        let source = self.current_item()?;
        self.start_task(
            TaskRequest::Transform { source, op },
            StartOptions::default(),
        )
    }

    /// Keeps everything after the current playback position.
    pub fn trim_front_here(&mut self) -> Result<TaskId, StartError> {
        let seconds = self.position_secs();
        self.transform_current(TransformOp::TrimFront { seconds })
    }

    /// Keeps everything before the current playback position.
    pub fn trim_end_here(&mut self) -> Result<TaskId, StartError> {
        let seconds = self.position_secs();
        self.transform_current(TransformOp::TrimEnd { seconds })
    }

    pub fn queue_post_action(&mut self, action: PostAction) -> Result<(), StartError> {
        let session = self.playback.as_mut().ok_or(StartError::NotInPlayback)?;
        let is_delete = action == PostAction::Delete;
        let has_more = session.queue(action);
        if !is_delete {
            return Ok(());
        }
        if has_more {
            self.play_current()?;
        } else {
            self.engine.stop();
            self.exit_requested = true;
        }
        Ok(())
    }

    /// Queues a copy of the current item into the upscale directory.
    pub fn queue_upscale_submit(&mut self) -> Result<PathBuf, StartError> {
        let directory = self
            .settings
            .queue
            .upscale_directory
            .clone()
            .ok_or(StartError::UpscaleDirectoryNotConfigured)?;
        let current = self.current_item()?;
        let name = current
            .file_name()
            .ok_or_else(|| StartError::MissingSource(current.clone()))?;
        let destination = unique_name(&directory, name)?;
        tracing::info!(
            source = %current.to_string_lossy(),
            destination = %destination.to_string_lossy(),
            "upscale submit queued"
        );
        self.queue_post_action(PostAction::CopyTo(destination.clone()))?;
        Ok(destination)
    }

    /// Moves every finished transform result out of its working directory.
    pub fn finalize_transforms(&mut self) -> FinalizeReport {
        let finals = std::mem::take(&mut self.pending_finalize);
        let report = finalize_transforms(&finals);
        for error in &report.errors {
            tracing::warn!(%error, "transform result could not be finalized");
        }
        report
    }

    /// Leaves playback once no transform is running: finalizes transform
    /// results, applies renames, and runs the remaining post actions as one
    /// batch whose completion reloads the folder.
    pub(crate) fn finish_playback(&mut self) {
        let Some(session) = self.playback.take() else {
            return;
        };
        self.engine.stop();
        self.exit_requested = false;

        let report = self.finalize_transforms();

        self.view = ViewMode::Folder;
        self.folder = session.return_folder().to_path_buf();
        self.title = self.folder.to_string_lossy().into_owned();

        let actions = session.into_post_actions();
        let async_count = actions.iter().filter(|(_, action)| action.is_async()).count();
        let mut wants_reload = !report.moved.is_empty();
        let batch = (async_count > 0).then(|| self.batches.open(self.folder.clone(), async_count, true));
        let options = StartOptions {
            attach_surface: false,
            batch: batch.map(BatchTag::counted),
        };

        for (source, action) in actions {
            let request = match action {
                PostAction::Rename(destination) => {
                    // A single rename on this thread; no copy fallback.
                    match std::fs::rename(&source, &destination) {
                        Ok(()) => {
                            tracing::info!(
                                from = %source.to_string_lossy(),
                                to = %destination.to_string_lossy(),
                                "renamed"
                            );
                            wants_reload = true;
                        }
                        Err(error) => tracing::warn!(
                            from = %source.to_string_lossy(),
                            to = %destination.to_string_lossy(),
                            cross_device = is_cross_device_error(&error),
                            %error,
                            "rename failed"
                        ),
                    }
                    continue;
                }
                PostAction::Delete => TaskRequest::Delete {
                    targets: vec![source],
                },
                PostAction::CopyTo(destination) => TaskRequest::CopyToPath {
                    source,
                    destination,
                },
            };
            if let Err(error) = self.start_task(request, options) {
                tracing::warn!(%error, "post-playback action could not start");
                if let Some(batch) = batch
                    && let Some(follow_up) = self.batches.complete(batch)
                {
                    self.apply_follow_up(follow_up);
                }
            }
        }

        if wants_reload && batch.is_none() {
            self.request_listing();
        }
    }
}

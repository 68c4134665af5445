use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use crate::file_ops::{self, DeferredDeletes, UpscaleOptions};
use crate::transform::{self, TransformOp};
use crate::{BatchTag, CANCELLING_SUFFIX, CancellationToken, Event, StatusHandle};

pub const TASK_CANCELED_MESSAGE: &str = "task canceled";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Registry partition. Each family has its own lock.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskFamily {
    FileOps,
    Transforms,
    Combines,
}

impl TaskFamily {
    pub const ALL: [Self; 3] = [Self::FileOps, Self::Transforms, Self::Combines];

    pub fn label(self) -> &'static str {
        match self {
            Self::FileOps => "file-ops",
            Self::Transforms => "transforms",
            Self::Combines => "combines",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    Copy,
    Move,
    Delete,
    CopyToPath,
    Transform,
    Combine,
    QueueSubmit,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::CopyToPath => "copy-to-path",
            Self::Transform => "transform",
            Self::Combine => "combine",
            Self::QueueSubmit => "queue-submit",
        }
    }

    pub fn family(self) -> TaskFamily {
        match self {
            Self::Copy | Self::Move | Self::Delete | Self::CopyToPath | Self::QueueSubmit => {
                TaskFamily::FileOps
            }
            Self::Transform => TaskFamily::Transforms,
            Self::Combine => TaskFamily::Combines,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferMode {
    Copy,
    Move,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskRequest {
    Transfer {
        mode: TransferMode,
        sources: Vec<PathBuf>,
        destination_dir: PathBuf,
    },
    Delete {
        targets: Vec<PathBuf>,
    },
    CopyToPath {
        source: PathBuf,
        destination: PathBuf,
    },
    Transform {
        source: PathBuf,
        op: TransformOp,
    },
    Combine {
        sources: Vec<PathBuf>,
        output: Option<PathBuf>,
    },
    QueueSubmit {
        sources: Vec<PathBuf>,
        queue_dir: PathBuf,
        options: UpscaleOptions,
    },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Transfer {
                mode: TransferMode::Copy,
                ..
            } => TaskKind::Copy,
            Self::Transfer {
                mode: TransferMode::Move,
                ..
            } => TaskKind::Move,
            Self::Delete { .. } => TaskKind::Delete,
            Self::CopyToPath { .. } => TaskKind::CopyToPath,
            Self::Transform { .. } => TaskKind::Transform,
            Self::Combine { .. } => TaskKind::Combine,
            Self::QueueSubmit { .. } => TaskKind::QueueSubmit,
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            Self::Transfer { sources, .. }
            | Self::Combine { sources, .. }
            | Self::QueueSubmit { sources, .. } => sources.len(),
            Self::Delete { targets } => targets.len(),
            Self::CopyToPath { .. } | Self::Transform { .. } => 1,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Transfer {
                mode,
                sources,
                destination_dir,
            } => format!(
                "{} {} item(s) -> {}",
                if *mode == TransferMode::Copy {
                    "copy"
                } else {
                    "move"
                },
                sources.len(),
                destination_dir.to_string_lossy()
            ),
            Self::Delete { targets } => format!("delete {} item(s)", targets.len()),
            Self::CopyToPath {
                source,
                destination,
            } => format!(
                "copy {} -> {}",
                source.to_string_lossy(),
                destination.to_string_lossy()
            ),
            Self::Transform { source, op } => {
                format!("{} {}", op.label(), source.to_string_lossy())
            }
            Self::Combine { sources, .. } => format!("combine {} video(s)", sources.len()),
            Self::QueueSubmit {
                sources, queue_dir, ..
            } => format!(
                "submit {} video(s) -> {}",
                sources.len(),
                queue_dir.to_string_lossy()
            ),
        }
    }

    /// Initial status-line label.
    pub fn status_label(&self) -> String {
        let verb = match self {
            Self::Transfer {
                mode: TransferMode::Copy,
                ..
            }
            | Self::CopyToPath { .. } => "Copy",
            Self::Transfer {
                mode: TransferMode::Move,
                ..
            } => "Move",
            Self::Delete { .. } => "Delete",
            Self::Transform { op, .. } => op.verb(),
            Self::Combine { .. } => "Combine",
            Self::QueueSubmit { .. } => "Submit",
        };
        let single = match self {
            Self::Transfer { sources, .. }
            | Self::Combine { sources, .. }
            | Self::QueueSubmit { sources, .. } => {
                (sources.len() == 1).then(|| sources[0].as_path())
            }
            Self::Delete { targets } => (targets.len() == 1).then(|| targets[0].as_path()),
            Self::CopyToPath { source, .. } | Self::Transform { source, .. } => {
                Some(source.as_path())
            }
        };
        match single {
            Some(path) => format!("{verb} {}", display_name(path)),
            None => format!("{verb} {} item(s)", self.item_count()),
        }
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Small fixed codes for failures that happen before or around the helper.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InternalCode {
    WorkingDir = 1,
    MissingPath = 2,
    InputCopy = 3,
    Pipe = 4,
    HelperSpawn = 5,
    TicketCreate = 6,
    TicketWrite = 7,
    TicketPublish = 8,
    DuplicateInput = 9,
    Io = 10,
    WorkerPanic = 11,
}

impl InternalCode {
    pub fn describe(self) -> &'static str {
        match self {
            Self::WorkingDir => "working directory could not be created",
            Self::MissingPath => "source or destination is missing",
            Self::InputCopy => "input copy failed",
            Self::Pipe => "helper output could not be read",
            Self::HelperSpawn => "helper could not be started",
            Self::TicketCreate => "ticket file could not be created",
            Self::TicketWrite => "ticket file could not be written",
            Self::TicketPublish => "ticket file could not be published",
            Self::DuplicateInput => "the same input was selected twice",
            Self::Io => "i/o failure",
            Self::WorkerPanic => "worker thread panicked",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultCode {
    Success,
    Canceled,
    Os(i32),
    Helper(i32),
    Internal(InternalCode),
}

impl ResultCode {
    pub const CANCELED_RAW: i32 = 125;

    pub fn raw(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Canceled => Self::CANCELED_RAW,
            Self::Os(code) | Self::Helper(code) => code,
            Self::Internal(code) => code as i32,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn is_canceled(self) -> bool {
        self == Self::Canceled
    }

    pub fn is_failure(self) -> bool {
        !self.is_success() && !self.is_canceled()
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => formatter.write_str("success"),
            Self::Canceled => formatter.write_str("canceled"),
            Self::Os(code) => write!(formatter, "{}", io::Error::from_raw_os_error(*code)),
            Self::Helper(code) => write!(formatter, "helper exited with code {code}"),
            Self::Internal(code) => {
                write!(formatter, "{} (code {})", code.describe(), *code as i32)
            }
        }
    }
}

impl From<io::Error> for ResultCode {
    fn from(error: io::Error) -> Self {
        match error.raw_os_error() {
            Some(code) => Self::Os(code),
            None if error.kind() == io::ErrorKind::Interrupted => Self::Canceled,
            None => Self::Internal(InternalCode::Io),
        }
    }
}

pub(crate) fn canceled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, TASK_CANCELED_MESSAGE)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskCompletion {
    pub id: TaskId,
    pub code: ResultCode,
    pub output: String,
    pub artifact: Option<PathBuf>,
    pub batch: Option<BatchTag>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskEvent {
    Output { id: TaskId, line: String },
    Finished(TaskCompletion),
}

/// Worker-side sink. Owns the task's cancel token, its progress routing and
/// the single completion send.
#[derive(Debug)]
pub struct TaskOutput {
    id: TaskId,
    sender: Sender<Event>,
    cancel: CancellationToken,
    status: StatusHandle,
    status_id: u64,
    batch: Option<BatchTag>,
    surface_attached: bool,
    buffer: String,
    limit: usize,
    truncated: bool,
}

impl TaskOutput {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        sender: Sender<Event>,
        cancel: CancellationToken,
        status: StatusHandle,
        status_id: u64,
        batch: Option<BatchTag>,
        surface_attached: bool,
        limit: usize,
    ) -> Self {
        Self {
            id,
            sender,
            cancel,
            status,
            status_id,
            batch,
            surface_attached,
            buffer: String::new(),
            limit,
            truncated: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn emit(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if self.surface_attached {
            let _ = self.sender.send(Event::Task(TaskEvent::Output {
                id: self.id,
                line: line.to_string(),
            }));
            return;
        }
        if self.truncated {
            return;
        }
        let needed = line.len() + 1;
        let room = self.limit.saturating_sub(self.buffer.len());
        if needed <= room {
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return;
        }
        let mut cut = room;
        while cut > 0 && !line.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.push_str(&line[..cut]);
        self.truncated = true;
    }

    /// Replaces this task's status-line label. A cancel request stays
    /// visible until the worker stops.
    pub fn progress(&self, label: impl Into<String>) {
        let mut label = label.into();
        if self.is_canceled() && !label.ends_with(CANCELLING_SUFFIX) {
            label.push_str(CANCELLING_SUFFIX);
        }
        self.status.update(self.status_id, label);
    }

    pub fn finish(self, code: ResultCode, artifact: Option<PathBuf>) {
        let completion = TaskCompletion {
            id: self.id,
            code,
            output: self.buffer,
            artifact,
            batch: self.batch,
        };
        if self
            .sender
            .send(Event::Task(TaskEvent::Finished(completion)))
            .is_err()
        {
            tracing::debug!(task_event = "orphaned", task_id = %self.id, "coordinator is gone");
        }
    }
}

/// Settings a worker needs, captured when the task starts.
#[derive(Clone, Debug)]
pub struct TaskEnvironment {
    pub ffmpeg: PathBuf,
    pub copy_chunk_bytes: usize,
    pub deferred_deletes: Option<DeferredDeletes>,
}

pub fn spawn_task(
    request: TaskRequest,
    output: TaskOutput,
    environment: TaskEnvironment,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("mx-task-{}", output.id()))
        .spawn(move || run_task(request, output, &environment))
}

pub fn run_task(request: TaskRequest, mut output: TaskOutput, environment: &TaskEnvironment) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        execute_task(request, &mut output, environment)
    }));
    let (code, artifact) = match outcome {
        Ok(Ok(artifact)) => (ResultCode::Success, artifact),
        Ok(Err(code)) => (code, None),
        Err(_) => {
            output.emit("ERROR: worker thread panicked");
            (ResultCode::Internal(InternalCode::WorkerPanic), None)
        }
    };
    output.finish(code, artifact);
}

fn execute_task(
    request: TaskRequest,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<Option<PathBuf>, ResultCode> {
    match request {
        TaskRequest::Transfer {
            mode,
            sources,
            destination_dir,
        } => file_ops::run_transfer(mode, &sources, &destination_dir, output, environment)
            .map(|()| None),
        TaskRequest::Delete { targets } => {
            file_ops::run_delete(&targets, output, environment).map(|()| None)
        }
        TaskRequest::CopyToPath {
            source,
            destination,
        } => file_ops::run_copy_to_path(&source, &destination, output, environment).map(Some),
        TaskRequest::Transform { source, op } => {
            transform::run_transform(&source, op, output, environment).map(Some)
        }
        TaskRequest::Combine { sources, output: target } => {
            transform::run_combine(&sources, target.as_deref(), output, environment).map(Some)
        }
        TaskRequest::QueueSubmit {
            sources,
            queue_dir,
            options,
        } => file_ops::run_queue_submit(&sources, &queue_dir, options, output, environment)
            .map(|()| None),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SurfaceLog {
    pub title: String,
    pub text: String,
    /// Set once the task failed; the surface stays until dismissed.
    pub persistent: bool,
}

#[derive(Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub summary: String,
    pub running: bool,
    pub done: bool,
    pub result: Option<ResultCode>,
    pub status_id: u64,
    pub batch: Option<BatchTag>,
    pub surface: Option<SurfaceLog>,
    pub started_at: Instant,
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        request: &TaskRequest,
        status_id: u64,
        batch: Option<BatchTag>,
        cancel: CancellationToken,
        surface_attached: bool,
    ) -> Self {
        let surface = surface_attached.then(|| SurfaceLog {
            title: request.summary(),
            text: String::new(),
            persistent: false,
        });
        Self {
            id,
            kind: request.kind(),
            summary: request.summary(),
            running: true,
            done: false,
            result: None,
            status_id,
            batch,
            surface,
            started_at: Instant::now(),
            cancel,
            handle: None,
        }
    }

    pub fn attach_handle(&mut self, handle: thread::JoinHandle<()>) {
        self.handle = Some(handle);
    }

    pub fn take_handle(&mut self) -> Option<thread::JoinHandle<()>> {
        self.handle.take()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TaskKind,
    pub summary: String,
    pub running: bool,
    pub result: Option<ResultCode>,
    pub surface: Option<SurfaceLog>,
}

/// Live tasks, partitioned by family. Access only goes through methods that
/// hold the family lock for the whole operation.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    file_ops: Mutex<Vec<TaskRecord>>,
    transforms: Mutex<Vec<TaskRecord>>,
    combines: Mutex<Vec<TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, family: TaskFamily) -> MutexGuard<'_, Vec<TaskRecord>> {
        let slot = match family {
            TaskFamily::FileOps => &self.file_ops,
            TaskFamily::Transforms => &self.transforms,
            TaskFamily::Combines => &self.combines,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: TaskRecord) {
        self.lock(record.kind.family()).push(record);
    }

    pub fn update<R>(&self, id: TaskId, apply: impl FnOnce(&mut TaskRecord) -> R) -> Option<R> {
        for family in TaskFamily::ALL {
            let mut records = self.lock(family);
            if let Some(record) = records.iter_mut().find(|record| record.id == id) {
                return Some(apply(record));
            }
        }
        None
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskRecord> {
        for family in TaskFamily::ALL {
            let mut records = self.lock(family);
            if let Some(index) = records.iter().position(|record| record.id == id) {
                return Some(records.remove(index));
            }
        }
        None
    }

    pub fn running_count(&self, family: TaskFamily) -> usize {
        self.lock(family)
            .iter()
            .filter(|record| record.running)
            .count()
    }

    pub fn active_count(&self) -> usize {
        TaskFamily::ALL
            .into_iter()
            .map(|family| self.running_count(family))
            .sum()
    }

    pub fn newest_running(&self, family: TaskFamily) -> Option<TaskId> {
        self.lock(family)
            .iter()
            .filter(|record| record.running)
            .map(|record| record.id)
            .max()
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        self.update(id, |record| {
            if !record.running {
                return false;
            }
            record.cancel.cancel();
            true
        })
        .unwrap_or(false)
    }

    pub fn cancel_all(&self) {
        for family in TaskFamily::ALL {
            for record in self.lock(family).iter().filter(|record| record.running) {
                record.cancel.cancel();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let mut snapshots = Vec::new();
        for family in TaskFamily::ALL {
            snapshots.extend(self.lock(family).iter().map(|record| TaskSnapshot {
                id: record.id,
                kind: record.kind,
                summary: record.summary.clone(),
                running: record.running,
                result: record.result,
                surface: record.surface.clone(),
            }));
        }
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    pub fn failures(&self) -> Vec<TaskSnapshot> {
        self.snapshot()
            .into_iter()
            .filter(|snapshot| snapshot.result.is_some_and(ResultCode::is_failure))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusTracker;
    use std::sync::mpsc;

    fn make_output(limit: usize, attached: bool) -> (TaskOutput, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let status = StatusTracker::new().handle(tx.clone());
        let output = TaskOutput::new(
            TaskId(7),
            tx,
            CancellationToken::new(),
            status,
            1,
            None,
            attached,
            limit,
        );
        (output, rx)
    }

    fn delete_request(path: &str) -> TaskRequest {
        TaskRequest::Delete {
            targets: vec![PathBuf::from(path)],
        }
    }

    #[test]
    fn io_errors_map_to_result_codes() {
        assert_eq!(
            ResultCode::from(io::Error::from_raw_os_error(2)),
            ResultCode::Os(2)
        );
        assert_eq!(ResultCode::from(canceled_error()), ResultCode::Canceled);
        assert_eq!(
            ResultCode::from(io::Error::other("boom")),
            ResultCode::Internal(InternalCode::Io)
        );
        assert!(ResultCode::Canceled.is_canceled());
        assert!(!ResultCode::Canceled.is_failure());
        assert!(ResultCode::Helper(1).is_failure());
        assert_eq!(ResultCode::Internal(InternalCode::TicketWrite).raw(), 7);
    }

    #[test]
    fn buffered_output_is_capped() {
        let (mut output, _rx) = make_output(16, false);
        output.emit("0123456789");
        output.emit("abcdefghij");
        output.emit("dropped");
        assert_eq!(output.buffered(), "0123456789\nabcde");
    }

    #[test]
    fn attached_surface_receives_lines_as_events() {
        let (mut output, rx) = make_output(16, true);
        output.emit("hello");
        assert!(output.buffered().is_empty());
        match rx.try_recv().expect("line should be forwarded") {
            Event::Task(TaskEvent::Output { id, line }) => {
                assert_eq!(id, TaskId(7));
                assert_eq!(line, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn progress_after_cancel_keeps_the_cancelling_suffix() {
        let (output, rx) = make_output(1024, false);
        output.progress("Copy a.mp4");
        output.cancel_token().cancel();
        output.progress("Copy b.mp4");
        output.progress(format!("Copy c.mp4{CANCELLING_SUFFIX}"));
        let labels: Vec<String> = rx
            .try_iter()
            .filter_map(|event| match event {
                Event::Status(message) => Some(message.text),
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                String::from("Copy a.mp4"),
                format!("Copy b.mp4{CANCELLING_SUFFIX}"),
                format!("Copy c.mp4{CANCELLING_SUFFIX}"),
            ]
        );
    }

    #[test]
    fn finish_sends_exactly_one_completion() {
        let (mut output, rx) = make_output(1024, false);
        output.emit("done");
        output.finish(ResultCode::Helper(3), None);
        match rx.try_recv().expect("completion should be sent") {
            Event::Task(TaskEvent::Finished(completion)) => {
                assert_eq!(completion.code, ResultCode::Helper(3));
                assert_eq!(completion.output, "done\n");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn registry_partitions_by_family_and_cancels() {
        let registry = TaskRegistry::new();
        let token = CancellationToken::new();
        registry.insert(TaskRecord::new(
            TaskId(1),
            &delete_request("/tmp/a"),
            1,
            None,
            token.child_token(),
            false,
        ));
        registry.insert(TaskRecord::new(
            TaskId(2),
            &TaskRequest::Transform {
                source: PathBuf::from("/tmp/b.mp4"),
                op: TransformOp::HorizontalFlip,
            },
            2,
            None,
            token.child_token(),
            false,
        ));
        registry.insert(TaskRecord::new(
            TaskId(3),
            &delete_request("/tmp/c"),
            3,
            None,
            token.child_token(),
            false,
        ));

        assert_eq!(registry.running_count(TaskFamily::FileOps), 2);
        assert_eq!(registry.running_count(TaskFamily::Transforms), 1);
        assert_eq!(registry.newest_running(TaskFamily::FileOps), Some(TaskId(3)));

        assert!(registry.cancel(TaskId(3)));
        assert_eq!(
            registry.update(TaskId(3), |record| record.is_cancel_requested()),
            Some(true)
        );
        assert_eq!(
            registry.update(TaskId(1), |record| record.is_cancel_requested()),
            Some(false)
        );

        let removed = registry.remove(TaskId(2)).expect("transform should be registered");
        assert_eq!(removed.kind, TaskKind::Transform);
        assert_eq!(registry.active_count(), 2);

        registry.cancel_all();
        assert_eq!(
            registry.update(TaskId(1), |record| record.is_cancel_requested()),
            Some(true)
        );
    }

    #[test]
    fn status_label_names_single_items() {
        let single = TaskRequest::Transfer {
            mode: TransferMode::Copy,
            sources: vec![PathBuf::from("/m/clip.mp4")],
            destination_dir: PathBuf::from("/dest"),
        };
        assert_eq!(single.status_label(), "Copy clip.mp4");

        let many = TaskRequest::Delete {
            targets: vec![PathBuf::from("/m/a"), PathBuf::from("/m/b")],
        };
        assert_eq!(many.status_label(), "Delete 2 item(s)");
        assert_eq!(many.kind().family(), TaskFamily::FileOps);
    }
}

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

use crate::signal::{Generation, GenerationGuard};
use crate::{Event, FileEntry, LibrarySettings, MediaMeta, SortMode, StatusHandle, read_entries};

pub const METADATA_STATUS_LABEL: &str = "Probing metadata";

#[derive(Debug)]
pub enum BackgroundEvent {
    ListingReady {
        generation: Generation,
        folder: PathBuf,
        sort: SortMode,
        result: Result<Vec<FileEntry>, String>,
    },
    MetadataReady {
        generation: Generation,
        path: PathBuf,
        meta: MediaMeta,
    },
    MetadataFinished {
        generation: Generation,
    },
}

/// Reads width, height and duration of one media file.
pub trait MetadataProbe: Send + Sync + fmt::Debug {
    fn probe(&self, path: &Path) -> io::Result<MediaMeta>;
}

#[derive(Clone, Debug)]
pub struct FfprobeProbe {
    program: PathBuf,
}

impl FfprobeProbe {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl MetadataProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> io::Result<MediaMeta> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "default=noprint_wrappers=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }
        Ok(parse_probe_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses `key=value` lines; `N/A` and unparsable values stay unset.
pub fn parse_probe_output(text: &str) -> MediaMeta {
    let mut meta = MediaMeta::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.eq_ignore_ascii_case("N/A") {
            continue;
        }
        match key.trim() {
            "width" => meta.width = value.parse().ok().or(meta.width),
            "height" => meta.height = value.parse().ok().or(meta.height),
            "duration" => {
                meta.duration = value
                    .parse::<f64>()
                    .ok()
                    .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                    .or(meta.duration);
            }
            _ => {}
        }
    }
    meta
}

pub fn spawn_listing(
    folder: PathBuf,
    sort: SortMode,
    library: LibrarySettings,
    guard: GenerationGuard,
    sender: Sender<Event>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from("mx-listing"))
        .spawn(move || run_listing(folder, sort, &library, &guard, &sender))
}

fn run_listing(
    folder: PathBuf,
    sort: SortMode,
    library: &LibrarySettings,
    guard: &GenerationGuard,
    sender: &Sender<Event>,
) {
    let result = match read_entries(&folder, sort, library, Some(guard)) {
        Ok(Some(entries)) => Ok(entries),
        Ok(None) => {
            tracing::debug!(
                task_event = "stale_abandoned",
                stream = "listing",
                generation = %guard.generation(),
                "listing abandoned"
            );
            return;
        }
        Err(error) => Err(error.to_string()),
    };
    let _ = sender.send(Event::Background(BackgroundEvent::ListingReady {
        generation: guard.generation(),
        folder,
        sort,
        result,
    }));
}

pub fn spawn_metadata(
    paths: Vec<PathBuf>,
    probe: Arc<dyn MetadataProbe>,
    guard: GenerationGuard,
    status: StatusHandle,
    sender: Sender<Event>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from("mx-metadata"))
        .spawn(move || run_metadata(&paths, probe.as_ref(), &guard, &status, &sender))
}

fn run_metadata(
    paths: &[PathBuf],
    probe: &dyn MetadataProbe,
    guard: &GenerationGuard,
    status: &StatusHandle,
    sender: &Sender<Event>,
) {
    let generation = guard.generation();
    let status_id = status.begin(METADATA_STATUS_LABEL);
    let mut probed = 0usize;
    for path in paths {
        if guard.is_stale() {
            tracing::debug!(
                task_event = "stale_abandoned",
                stream = "metadata",
                generation = %generation,
                probed,
                "metadata enrichment abandoned"
            );
            status.end(status_id);
            return;
        }
        match probe.probe(path) {
            Ok(meta) => {
                probed += 1;
                let event = BackgroundEvent::MetadataReady {
                    generation,
                    path: path.clone(),
                    meta,
                };
                if sender.send(Event::Background(event)).is_err() {
                    status.end(status_id);
                    return;
                }
            }
            Err(error) => {
                tracing::debug!(path = %path.to_string_lossy(), %error, "probe failed");
            }
        }
    }
    status.end(status_id);
    let _ = sender.send(Event::Background(BackgroundEvent::MetadataFinished {
        generation,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusTracker;
    use crate::signal::GenerationCounter;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingProbe {
        seen: Mutex<Vec<PathBuf>>,
    }

    impl MetadataProbe for RecordingProbe {
        fn probe(&self, path: &Path) -> io::Result<MediaMeta> {
            self.seen
                .lock()
                .expect("probe log should lock")
                .push(path.to_path_buf());
            Ok(MediaMeta {
                width: Some(1920),
                height: Some(1080),
                duration: Some(1.5),
            })
        }
    }

    #[test]
    fn probe_output_parses_known_keys() {
        let meta = parse_probe_output("width=1280\nheight=720\nduration=N/A\nfoo=bar\n");
        assert_eq!(meta.width, Some(1280));
        assert_eq!(meta.height, Some(720));
        assert_eq!(meta.duration, None);

        let meta = parse_probe_output("duration=12.345000\n");
        assert_eq!(meta.duration, Some(12.345));
    }

    #[test]
    fn metadata_worker_reports_each_path_then_finishes() {
        let counter = GenerationCounter::new();
        let generation = counter.advance();
        let tracker = StatusTracker::new();
        let (sender, receiver) = mpsc::channel();
        let probe = Arc::new(RecordingProbe::default());

        let handle = spawn_metadata(
            vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")],
            probe.clone(),
            counter.guard(generation),
            tracker.handle(sender.clone()),
            sender,
        )
        .expect("metadata worker should spawn");
        handle.join().expect("metadata worker should not panic");

        let mut ready = Vec::new();
        let mut finished = false;
        while let Ok(event) = receiver.recv_timeout(Duration::from_secs(1)) {
            match event {
                Event::Background(BackgroundEvent::MetadataReady { path, .. }) => {
                    ready.push(path)
                }
                Event::Background(BackgroundEvent::MetadataFinished { generation: done }) => {
                    assert_eq!(done, generation);
                    finished = true;
                }
                _ => {}
            }
        }
        assert_eq!(ready, vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")]);
        assert!(finished);
    }

    #[test]
    fn stale_metadata_worker_abandons_without_probing() {
        let counter = GenerationCounter::new();
        let generation = counter.advance();
        counter.advance();
        let tracker = StatusTracker::new();
        let (sender, receiver) = mpsc::channel();
        let probe = Arc::new(RecordingProbe::default());

        spawn_metadata(
            vec![PathBuf::from("a.mp4")],
            probe.clone(),
            counter.guard(generation),
            tracker.handle(sender.clone()),
            sender,
        )
        .expect("metadata worker should spawn")
        .join()
        .expect("metadata worker should not panic");

        assert!(probe.seen.lock().expect("probe log should lock").is_empty());
        while let Ok(event) = receiver.recv_timeout(Duration::from_millis(100)) {
            assert!(
                !matches!(event, Event::Background(_)),
                "stale worker should send no results"
            );
        }
    }
}

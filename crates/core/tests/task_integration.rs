#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mx_core::{
    CANCELLING_SUFFIX, Coordinator, NullEngine, ResultCode, Settings, StartError, StartOptions,
    TaskRequest, TransferMode, TransformOp, UpscaleOptions, UpscaleTarget,
};

const WAIT: Duration = Duration::from_secs(10);

fn make_temp_dir(label: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let root = env::temp_dir().join(format!("mx-task-it-{label}-{stamp}"));
    fs::create_dir_all(&root).expect("temp root should be creatable");
    root
}

fn coordinator(folder: &Path, settings: Settings) -> Coordinator {
    Coordinator::with_parts(
        folder.to_path_buf(),
        settings,
        Box::new(NullEngine::default()),
        None,
    )
}

fn wait_idle(coordinator: &mut Coordinator) {
    let idle = coordinator.wait_until(WAIT, |state| state.tasks().active_count() == 0);
    assert!(idle, "tasks should finish in time");
}

#[test]
fn copy_then_move_then_delete_through_the_coordinator() {
    let root = make_temp_dir("transfer");
    let source = root.join("clip.mp4");
    fs::write(&source, "payload").expect("source should be writable");
    let copies = root.join("copies");
    let moved = root.join("moved");
    fs::create_dir_all(&copies).expect("copy destination should exist");
    fs::create_dir_all(&moved).expect("move destination should exist");
    let mut coordinator = coordinator(&root, Settings::default());

    coordinator
        .state
        .start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Copy,
                sources: vec![source.clone()],
                destination_dir: copies.clone(),
            },
            StartOptions::default(),
        )
        .expect("copy should start");
    wait_idle(&mut coordinator);
    assert_eq!(
        fs::read_to_string(copies.join("clip.mp4")).expect("copy should exist"),
        "payload"
    );
    assert!(source.exists(), "copy keeps the source");

    coordinator
        .state
        .start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Move,
                sources: vec![source.clone()],
                destination_dir: copies.clone(),
            },
            StartOptions::default(),
        )
        .expect("move should start");
    wait_idle(&mut coordinator);
    assert!(!source.exists(), "move removes the source");
    assert!(copies.join("clip (1).mp4").exists(), "move picks a free name");

    coordinator
        .state
        .start_task(
            TaskRequest::Delete {
                targets: vec![copies.join("clip.mp4"), copies.join("clip (1).mp4")],
            },
            StartOptions::default(),
        )
        .expect("delete should start");
    wait_idle(&mut coordinator);
    assert_eq!(
        fs::read_dir(&copies).expect("copies should list").count(),
        0
    );
    assert!(coordinator.state.tasks().snapshot().is_empty());
    assert_eq!(coordinator.state.status_text(), "");

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn preconditions_are_checked_before_spawning() {
    let root = make_temp_dir("preconditions");
    let mut coordinator = coordinator(&root, Settings::default());

    let missing = root.join("nowhere");
    let error = coordinator
        .state
        .start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Copy,
                sources: vec![root.join("a.mp4")],
                destination_dir: missing.clone(),
            },
            StartOptions::default(),
        )
        .expect_err("missing destination should be refused");
    assert!(matches!(error, StartError::MissingDestination(path) if path == missing));

    let error = coordinator
        .state
        .start_task(
            TaskRequest::Combine {
                sources: vec![root.join("a.mp4"), root.join("b.mp4")],
                output: None,
            },
            StartOptions::default(),
        )
        .expect_err("ffmpeg is disabled by default");
    assert!(matches!(error, StartError::ToolDisabled("ffmpeg")));

    let error = coordinator
        .state
        .submit_to_queue(vec![root.join("a.mp4")], UpscaleOptions::default())
        .expect_err("queue is not configured");
    assert!(matches!(error, StartError::QueueNotConfigured));

    assert!(coordinator.state.tasks().snapshot().is_empty());
    assert_eq!(coordinator.state.status.running(), 0);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

fn listed_names(directory: &Path) -> Vec<String> {
    fs::read_dir(directory)
        .expect("directory should list")
        .map(|entry| {
            entry
                .expect("entry should read")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[test]
fn cancelled_copy_never_leaves_a_partial_destination() {
    let root = make_temp_dir("cancel");
    let source = root.join("big.mp4");
    fs::write(&source, vec![7_u8; 16 * 1024 * 1024]).expect("source should be writable");
    let destination_dir = root.join("dest");
    fs::create_dir_all(&destination_dir).expect("destination should exist");

    let mut settings = Settings::default();
    settings.tasks.copy_chunk_bytes = 4096;
    let mut coordinator = coordinator(&root, settings);
    let id = coordinator
        .state
        .start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Copy,
                sources: vec![source.clone()],
                destination_dir: destination_dir.clone(),
            },
            StartOptions::default(),
        )
        .expect("copy should start");
    // Nothing was pumped yet, so the task is still registered as running.
    assert_eq!(coordinator.state.cancel_most_recent(), Some(id));
    assert_eq!(
        coordinator.state.status_text(),
        format!("Copy big.mp4{CANCELLING_SUFFIX}")
    );
    wait_idle(&mut coordinator);

    assert!(
        coordinator.state.tasks().failures().is_empty(),
        "cancellation is not a failure"
    );
    assert_eq!(coordinator.state.status_text(), "");
    let names = listed_names(&destination_dir);
    assert!(
        names.iter().all(|name| !name.ends_with(".mxpart")),
        "no partial file may survive: {names:?}"
    );
    // Either stopped mid-copy or finished before the cancel was observed.
    if let Some(copy) = names.first() {
        let copied = fs::metadata(destination_dir.join(copy)).expect("copy should stat");
        assert_eq!(copied.len(), 16 * 1024 * 1024, "a visible copy is complete");
    }
    assert!(source.exists(), "source is never touched by a copy");

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn copy_started_after_shutdown_is_cancelled_before_writing() {
    let root = make_temp_dir("cancel-first");
    let source = root.join("big.mp4");
    fs::write(&source, vec![7_u8; 4 * 1024 * 1024]).expect("source should be writable");
    let destination_dir = root.join("dest");
    fs::create_dir_all(&destination_dir).expect("destination should exist");

    let mut coordinator = coordinator(&root, Settings::default());
    coordinator.state.shutdown();
    coordinator
        .state
        .start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Copy,
                sources: vec![source.clone()],
                destination_dir: destination_dir.clone(),
            },
            StartOptions::default(),
        )
        .expect("copy should start");
    wait_idle(&mut coordinator);

    assert!(coordinator.state.tasks().snapshot().is_empty());
    assert!(
        listed_names(&destination_dir).is_empty(),
        "a cancelled copy to a new destination leaves nothing behind"
    );
    assert!(source.exists());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn batch_reload_fires_once_after_mixed_outcomes() {
    let root = make_temp_dir("batch");
    let clip = root.join("clip.mp4");
    fs::write(&clip, "clip").expect("clip should be writable");
    let mut settings = Settings::default();
    settings.tools.ffmpeg_enabled = true;
    settings.tools.ffmpeg_path = root.join("missing-ffmpeg");
    let mut coordinator = coordinator(&root, settings);

    let batch = coordinator.state.batches.open(root.clone(), 2, true);
    let options = StartOptions {
        attach_surface: false,
        batch: Some(mx_core::BatchTag::counted(batch)),
    };
    let before = coordinator.state.listing_generation();
    coordinator
        .state
        .start_task(
            TaskRequest::Transform {
                source: clip.clone(),
                op: TransformOp::HorizontalFlip,
            },
            options,
        )
        .expect("transform should start");
    coordinator
        .state
        .start_task(
            TaskRequest::CopyToPath {
                source: clip.clone(),
                destination: root.join("copy.mp4"),
            },
            options,
        )
        .expect("copy should start");
    wait_idle(&mut coordinator);
    let reloaded = coordinator.wait_until(WAIT, |state| !state.loading);
    assert!(reloaded, "follow-up listing should complete");

    assert_eq!(coordinator.state.listing_generation().0, before.0 + 1);
    assert!(coordinator.state.batches.is_empty());
    let failures = coordinator.state.tasks().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].result,
        Some(ResultCode::Internal(mx_core::InternalCode::HelperSpawn))
    );
    let surface = failures[0]
        .surface
        .as_ref()
        .expect("failed task should keep a surface");
    assert!(surface.persistent);
    assert!(surface.text.contains("ERROR"));
    let names: Vec<&str> = coordinator
        .state
        .entries
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert!(names.contains(&"copy.mp4"), "reload should see the copy: {names:?}");

    assert!(coordinator.state.dismiss_failure(failures[0].id));
    assert!(coordinator.state.tasks().snapshot().is_empty());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn batch_reload_is_skipped_once_the_view_moved_on() {
    let root = make_temp_dir("batch-moved");
    let other = root.join("other");
    fs::create_dir_all(&other).expect("other folder should exist");
    let clip = root.join("clip.mp4");
    fs::write(&clip, "clip").expect("clip should be writable");
    let mut coordinator = coordinator(&root, Settings::default());

    let batch = coordinator.state.batches.open(root.clone(), 1, true);
    coordinator
        .state
        .open_folder(other.clone())
        .expect("other folder should open");
    let after_navigation = coordinator.state.listing_generation();
    coordinator
        .state
        .start_task(
            TaskRequest::Delete {
                targets: vec![clip.clone()],
            },
            StartOptions {
                attach_surface: false,
                batch: Some(mx_core::BatchTag::counted(batch)),
            },
        )
        .expect("delete should start");
    wait_idle(&mut coordinator);

    assert!(!clip.exists());
    assert!(coordinator.state.batches.is_empty());
    assert_eq!(coordinator.state.listing_generation(), after_navigation);

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

#[test]
fn queue_submission_publishes_video_and_ticket() {
    let root = make_temp_dir("queue");
    let queue = root.join("queue");
    fs::create_dir_all(&queue).expect("queue should exist");
    let clip = root.join("clip.mp4");
    fs::write(&clip, "clip").expect("clip should be writable");
    fs::write(queue.join("clip.json"), "{}").expect("existing ticket should be writable");

    let mut settings = Settings::default();
    settings.queue.upscale_queue = Some(queue.clone());
    let mut coordinator = coordinator(&root, settings);
    coordinator
        .state
        .submit_to_queue(
            vec![clip.clone()],
            UpscaleOptions {
                target: UpscaleTarget::Uhd8k,
                ..UpscaleOptions::default()
            },
        )
        .expect("submit should start");
    wait_idle(&mut coordinator);
    assert!(coordinator.state.tasks().failures().is_empty());

    assert_eq!(
        fs::read_to_string(queue.join("clip (1).mp4")).expect("queued video should exist"),
        "clip"
    );
    let ticket = fs::read_to_string(queue.join("clip (1).json")).expect("ticket should exist");
    assert!(ticket.contains("\"target\": \"8k\""));
    assert!(ticket.contains("\"target_w\": 7680"));
    assert!(!queue.join("clip (1)._json").exists());

    fs::remove_dir_all(&root).expect("temp tree should be removable");
}

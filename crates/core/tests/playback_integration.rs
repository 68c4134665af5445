#![forbid(unsafe_code)]
#![cfg(unix)]

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mx_core::{
    Coordinator, Event, NullEngine, PostAction, ResultCode, Settings, StartOptions, TaskRequest,
    TransformOp, ViewMode,
};

const WAIT: Duration = Duration::from_secs(10);

// Copies the `-i` input to the last argument; `concat:` inputs are joined.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
in=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -i) in="$2"; shift 2 ;;
    *) out="$1"; shift ;;
  esac
done
echo "fake ffmpeg: $in -> $out" 1>&2
case "$in" in
  concat:*)
    list="${in#concat:}"
    : > "$out"
    IFS='|'
    for part in $list; do cat "$part" >> "$out"; done
    ;;
  *) cat "$in" > "$out" ;;
esac
"#;

const FAILING_FFMPEG: &str = "#!/bin/sh\necho 'fake ffmpeg: broken input' 1>&2\nexit 7\n";

const SILENT_FFMPEG: &str = "#!/bin/sh\nexit 0\n";

fn make_temp_dir(label: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let root = env::temp_dir().join(format!("mx-playback-it-{label}-{stamp}"));
    fs::create_dir_all(&root).expect("temp root should be creatable");
    root
}

fn install_script(directory: &Path, body: &str) -> PathBuf {
    let script = directory.join("ffmpeg.sh");
    fs::write(&script, body).expect("script should be writable");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .expect("script should be executable");
    script
}

fn coordinator(library: &Path, ffmpeg: PathBuf) -> Coordinator {
    let mut settings = Settings::default();
    settings.tools.ffmpeg_enabled = true;
    settings.tools.ffmpeg_path = ffmpeg;
    settings.tasks.barrier_poll_ms = 5;
    Coordinator::with_parts(
        library.to_path_buf(),
        settings,
        Box::new(NullEngine::default()),
        None,
    )
}

fn settle(coordinator: &mut Coordinator) {
    let settled = coordinator.wait_until(WAIT, |state| {
        state.tasks().active_count() == 0 && state.batches.is_empty() && !state.loading
    });
    assert!(settled, "tasks and follow-up listing should settle");
}

#[test]
fn flip_result_is_finalized_next_to_the_source() {
    let tools = make_temp_dir("flip-tools");
    let library = make_temp_dir("flip");
    let clip = library.join("clip.mp4");
    fs::write(&clip, "frames").expect("clip should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));

    coordinator
        .state
        .start_task(
            TaskRequest::Transform {
                source: clip.clone(),
                op: TransformOp::HorizontalFlip,
            },
            StartOptions::default(),
        )
        .expect("flip should start");
    settle(&mut coordinator);
    assert_eq!(coordinator.state.pending_finalize().len(), 1);

    let report = coordinator.state.finalize_transforms();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.moved, vec![library.join("clip (1).mp4")]);
    assert_eq!(
        fs::read_to_string(library.join("clip (1).mp4")).expect("result should exist"),
        "frames"
    );
    assert!(!library.join("video_process").exists());
    assert!(coordinator.state.pending_finalize().is_empty());

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn failing_helper_keeps_its_output_and_exit_code() {
    let tools = make_temp_dir("fail-tools");
    let library = make_temp_dir("fail");
    let clip = library.join("clip.mp4");
    fs::write(&clip, "frames").expect("clip should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAILING_FFMPEG));

    coordinator
        .state
        .start_task(
            TaskRequest::Transform {
                source: clip.clone(),
                op: TransformOp::TrimEnd { seconds: 3.0 },
            },
            StartOptions::default(),
        )
        .expect("trim should start");
    settle(&mut coordinator);

    let failures = coordinator.state.tasks().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].result, Some(ResultCode::Helper(7)));
    let surface = failures[0]
        .surface
        .as_ref()
        .expect("failure should keep its output");
    assert!(surface.text.contains("broken input"));
    assert!(surface.text.contains("ffmpeg exited with code 7"));
    assert!(coordinator.state.pending_finalize().is_empty());
    assert!(!library.join("video_process").join("clip_trimend.mp4").exists());

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn combine_joins_inputs_and_removes_the_staging_folder() {
    let tools = make_temp_dir("combine-tools");
    let library = make_temp_dir("combine");
    let first = library.join("a.mp4");
    let second = library.join("b.mp4");
    fs::write(&first, "A").expect("first input should be writable");
    fs::write(&second, "B").expect("second input should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));

    coordinator
        .state
        .start_task(
            TaskRequest::Combine {
                sources: vec![first.clone(), second.clone()],
                output: None,
            },
            StartOptions::default(),
        )
        .expect("combine should start");
    settle(&mut coordinator);

    assert!(coordinator.state.tasks().failures().is_empty());
    assert_eq!(
        fs::read_to_string(library.join("a_combined.mp4")).expect("combined video should exist"),
        "AB"
    );
    assert!(!library.join("video_combine").exists());

    coordinator
        .state
        .start_task(
            TaskRequest::Combine {
                sources: vec![first.clone(), first.clone()],
                output: None,
            },
            StartOptions::default(),
        )
        .expect("duplicate combine still starts");
    settle(&mut coordinator);
    let failures = coordinator.state.tasks().failures();
    assert_eq!(
        failures[0].result,
        Some(ResultCode::Internal(mx_core::InternalCode::DuplicateInput))
    );

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn combine_resolves_relative_paths_against_the_process_directory() {
    let tools = make_temp_dir("combine-relative-tools");
    let library = make_temp_dir("combine-relative");
    fs::write(library.join("a.mp4"), "A").expect("first input should be writable");
    fs::write(library.join("b.mp4"), "B").expect("second input should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));
    // Only this test relies on the working directory.
    env::set_current_dir(&library).expect("library should become the working directory");

    coordinator
        .state
        .start_task(
            TaskRequest::Combine {
                sources: vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")],
                output: Some(PathBuf::from("out.mp4")),
            },
            StartOptions::default(),
        )
        .expect("combine should start");
    settle(&mut coordinator);
    env::set_current_dir(env::temp_dir()).expect("temp dir should become the working directory");

    assert!(coordinator.state.tasks().failures().is_empty());
    assert_eq!(
        fs::read_to_string(library.join("out.mp4")).expect("combined video should exist"),
        "AB"
    );
    assert!(!library.join("video_combine").exists());

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn combine_without_output_fails_and_keeps_the_staging_folder() {
    let tools = make_temp_dir("combine-silent-tools");
    let library = make_temp_dir("combine-silent");
    let first = library.join("a.mp4");
    let second = library.join("b.mp4");
    fs::write(&first, "A").expect("first input should be writable");
    fs::write(&second, "B").expect("second input should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, SILENT_FFMPEG));

    coordinator
        .state
        .start_task(
            TaskRequest::Combine {
                sources: vec![first, second],
                output: None,
            },
            StartOptions::default(),
        )
        .expect("combine should start");
    settle(&mut coordinator);

    let failures = coordinator.state.tasks().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].result,
        Some(ResultCode::Internal(mx_core::InternalCode::MissingPath))
    );
    assert!(!library.join("a_combined.mp4").exists());
    assert!(library.join("video_combine").is_dir());

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn leaving_playback_waits_for_transforms_then_runs_post_actions() {
    let tools = make_temp_dir("exit-tools");
    let library = make_temp_dir("exit");
    let keep = library.join("keep");
    fs::create_dir_all(&keep).expect("keep folder should exist");
    let first = library.join("a.mp4");
    let second = library.join("b.mp4");
    fs::write(&first, "first").expect("first clip should be writable");
    fs::write(&second, "second").expect("second clip should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));

    coordinator
        .state
        .enter_playback(vec![first.clone(), second.clone()])
        .expect("playback should start");
    assert_eq!(coordinator.state.view, ViewMode::Playback);
    assert!(coordinator.state.title.starts_with("(Play List 1 of 2)"));

    coordinator
        .state
        .transform_current(TransformOp::HorizontalFlip)
        .expect("flip should start");
    coordinator
        .state
        .queue_post_action(PostAction::CopyTo(keep.join("a.mp4")))
        .expect("copy should queue");

    let sender = coordinator.state.event_sender();
    sender.send(Event::EndReached).expect("channel should be open");
    sender.send(Event::EndReached).expect("channel should be open");
    let left = coordinator.wait_until(WAIT, |state| state.view == ViewMode::Folder);
    assert!(left, "playback should end after the last item");
    assert!(coordinator.state.playback().is_none());
    settle(&mut coordinator);

    assert_eq!(coordinator.state.folder, library);
    assert_eq!(
        fs::read_to_string(keep.join("a.mp4")).expect("post-action copy should exist"),
        "first"
    );
    let names: Vec<&str> = coordinator
        .state
        .entries
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert!(names.contains(&"a (1).mp4"), "reload should list the flip: {names:?}");
    assert!(!library.join("video_process").exists());

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn deleting_the_only_item_exits_playback_and_removes_it() {
    let tools = make_temp_dir("delete-tools");
    let library = make_temp_dir("delete");
    let clip = library.join("clip.mp4");
    fs::write(&clip, "frames").expect("clip should be writable");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));

    coordinator
        .state
        .enter_playback(vec![clip.clone()])
        .expect("playback should start");
    coordinator
        .state
        .queue_post_action(PostAction::Delete)
        .expect("delete should queue");
    coordinator.pump();
    assert_eq!(coordinator.state.view, ViewMode::Folder);
    settle(&mut coordinator);

    assert!(!clip.exists());
    assert!(
        coordinator
            .state
            .entries
            .iter()
            .all(|entry| entry.name != "clip.mp4")
    );

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

#[test]
fn rename_is_applied_when_playback_ends() {
    let tools = make_temp_dir("rename-tools");
    let library = make_temp_dir("rename");
    let clip = library.join("clip.mp4");
    fs::write(&clip, "frames").expect("clip should be writable");
    let renamed = library.join("keeper.mp4");
    let mut coordinator = coordinator(&library, install_script(&tools, FAKE_FFMPEG));

    coordinator
        .state
        .enter_playback(vec![clip.clone()])
        .expect("playback should start");
    coordinator
        .state
        .queue_post_action(PostAction::Rename(renamed.clone()))
        .expect("rename should queue");
    coordinator
        .state
        .event_sender()
        .send(Event::EndReached)
        .expect("channel should be open");
    coordinator.pump_timeout(WAIT);

    assert_eq!(coordinator.state.view, ViewMode::Folder);
    assert!(!clip.exists(), "rename happens before exit returns");
    assert_eq!(
        fs::read_to_string(&renamed).expect("renamed clip should exist"),
        "frames"
    );
    assert!(coordinator.state.tasks().snapshot().is_empty());
    settle(&mut coordinator);
    assert!(
        coordinator
            .state
            .entries
            .iter()
            .any(|entry| entry.name == "keeper.mp4")
    );

    fs::remove_dir_all(&library).expect("temp tree should be removable");
    fs::remove_dir_all(&tools).expect("temp tree should be removable");
}

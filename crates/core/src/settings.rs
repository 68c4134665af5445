use std::path::PathBuf;

pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "mov", "avi", "wmv", "m4v", "ts", "m2ts", "webm", "flv", "rm",
];

pub const LOG_FILE_NAME: &str = "mx.log";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    pub tools: ToolSettings,
    pub library: LibrarySettings,
    pub queue: QueueSettings,
    pub tasks: TaskSettings,
    pub logging: LoggingSettings,
    pub paths: PathSettings,
}

impl Settings {
    pub fn log_file(&self) -> Option<PathBuf> {
        if !self.logging.enabled {
            return None;
        }
        self.logging
            .directory
            .as_ref()
            .map(|directory| directory.join(LOG_FILE_NAME))
    }

    pub fn deferred_deletes_journal(&self) -> Option<PathBuf> {
        self.paths
            .state_dir
            .as_ref()
            .map(|directory| directory.join("pending-deletes"))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolSettings {
    pub ffmpeg_enabled: bool,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_enabled: bool,
    pub ffprobe_path: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffmpeg_enabled: false,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_enabled: false,
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LibrarySettings {
    pub media_extensions: Vec<String>,
}

impl LibrarySettings {
    pub fn is_media_name(&self, name: &str) -> bool {
        let Some((_, extension)) = name.rsplit_once('.') else {
            return false;
        };
        self.media_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            media_extensions: DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueSettings {
    /// Post-playback "submit for upscaling" copies land here.
    pub upscale_directory: Option<PathBuf>,
    /// Upscale queue that receives a video plus its JSON ticket.
    pub upscale_queue: Option<PathBuf>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskSettings {
    pub output_buffer_limit: usize,
    pub barrier_poll_ms: u64,
    pub copy_chunk_bytes: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            output_buffer_limit: 64 * 1024,
            barrier_poll_ms: 50,
            copy_chunk_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoggingSettings {
    pub enabled: bool,
    pub directory: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PathSettings {
    pub state_dir: Option<PathBuf>,
}

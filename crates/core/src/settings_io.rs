use crate::Settings;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn settings_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/mx/settings.ini"))
}

pub fn default_state_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state/mx"))
}

pub fn load_settings(path: &Path) -> io::Result<Settings> {
    let mut settings = Settings::default();
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(settings),
        Err(error) => return Err(error),
    };
    apply_settings_ini(&mut settings, &source);
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> io::Result<()> {
    write_atomic(path, &render_settings_ini(settings))
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" => Some(true),
        "0" | "false" | "no" | "off" | "n" => Some(false),
        _ => None,
    }
}

fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("settings");
    let tmp = path.with_file_name(format!("{stem}.tmp-{}", std::process::id()));
    fs::write(&tmp, content)?;
    #[cfg(windows)]
    {
        match fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                fs::remove_file(path)?;
                fs::rename(tmp, path)
            }
            Err(error) => Err(error),
        }
    }
    #[cfg(not(windows))]
    {
        fs::rename(tmp, path)
    }
}

fn parse_ini_section_name(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.starts_with('[') && line.ends_with(']') {
        return Some(line[1..line.len() - 1].trim());
    }
    None
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find(';') {
        Some(index) => line[..index].trim(),
        None => line,
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// Applies `settings.ini` on top of `settings`.
///
/// Sectioned keys take the form `[tools] ffmpeg_path = ...`. The flat keys of
/// the older `mediaexplorer.ini` layout are accepted in any section.
pub fn apply_settings_ini(settings: &mut Settings, source: &str) {
    let mut section = String::new();
    let mut saw_extensions = false;

    for raw_line in source.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section_name) = parse_ini_section_name(line) {
            section = section_name.to_ascii_lowercase();
            continue;
        }

        let line = strip_inline_comment(line);
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim().to_ascii_lowercase();
        let value = raw_value.trim();

        match (section.as_str(), key.as_str()) {
            ("tools", "ffmpeg_enabled") | (_, "ffmpegavailable") => {
                if let Some(parsed) = parse_bool(value) {
                    settings.tools.ffmpeg_enabled = parsed;
                }
            }
            ("tools", "ffprobe_enabled") | (_, "ffprobeavailable") => {
                if let Some(parsed) = parse_bool(value) {
                    settings.tools.ffprobe_enabled = parsed;
                }
            }
            (_, "ffmpeg_path" | "ffmpegpath") => {
                if !value.is_empty() {
                    settings.tools.ffmpeg_path = PathBuf::from(value);
                }
            }
            (_, "ffprobe_path" | "ffprobepath") => {
                if !value.is_empty() {
                    settings.tools.ffprobe_path = PathBuf::from(value);
                }
            }
            ("library", "media_extension") => {
                if !saw_extensions {
                    settings.library.media_extensions.clear();
                    saw_extensions = true;
                }
                let extension = value.trim_start_matches('.').to_ascii_lowercase();
                if !extension.is_empty() {
                    settings.library.media_extensions.push(extension);
                }
            }
            ("queue", "upscale_directory") | (_, "upscaledirectory") => {
                settings.queue.upscale_directory = optional_path(value);
            }
            ("queue", "upscale_queue") | (_, "topazupscalequeue") => {
                settings.queue.upscale_queue = optional_path(value);
            }
            ("tasks", "output_buffer_limit") => {
                if let Ok(parsed) = value.parse::<usize>() {
                    settings.tasks.output_buffer_limit = parsed;
                }
            }
            ("tasks", "barrier_poll_ms") => {
                if let Ok(parsed) = value.parse::<u64>() {
                    settings.tasks.barrier_poll_ms = parsed.max(1);
                }
            }
            ("tasks", "copy_chunk_bytes") => {
                if let Ok(parsed) = value.parse::<usize>() {
                    settings.tasks.copy_chunk_bytes = parsed.max(4096);
                }
            }
            ("logging", "enabled") | (_, "loggingenabled") => {
                if let Some(parsed) = parse_bool(value) {
                    settings.logging.enabled = parsed;
                }
            }
            ("logging", "directory") | (_, "loggingpath") => {
                settings.logging.directory = optional_path(value);
            }
            ("paths", "state_dir") => {
                settings.paths.state_dir = optional_path(value);
            }
            _ => {
                tracing::debug!(section = %section, key = %key, "ignoring unknown settings key");
            }
        }
    }
}

fn render_optional_path(path: Option<&PathBuf>) -> String {
    path.map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn render_settings_ini(settings: &Settings) -> String {
    let mut lines = vec![
        String::from("[tools]"),
        format!("ffmpeg_enabled={}", settings.tools.ffmpeg_enabled),
        format!(
            "ffmpeg_path={}",
            settings.tools.ffmpeg_path.to_string_lossy()
        ),
        format!("ffprobe_enabled={}", settings.tools.ffprobe_enabled),
        format!(
            "ffprobe_path={}",
            settings.tools.ffprobe_path.to_string_lossy()
        ),
        String::new(),
        String::from("[library]"),
    ];
    for extension in &settings.library.media_extensions {
        lines.push(format!("media_extension={extension}"));
    }
    lines.extend([
        String::new(),
        String::from("[queue]"),
        format!(
            "upscale_directory={}",
            render_optional_path(settings.queue.upscale_directory.as_ref())
        ),
        format!(
            "upscale_queue={}",
            render_optional_path(settings.queue.upscale_queue.as_ref())
        ),
        String::new(),
        String::from("[tasks]"),
        format!("output_buffer_limit={}", settings.tasks.output_buffer_limit),
        format!("barrier_poll_ms={}", settings.tasks.barrier_poll_ms),
        format!("copy_chunk_bytes={}", settings.tasks.copy_chunk_bytes),
        String::new(),
        String::from("[logging]"),
        format!("enabled={}", settings.logging.enabled),
        format!(
            "directory={}",
            render_optional_path(settings.logging.directory.as_ref())
        ),
        String::new(),
        String::from("[paths]"),
        format!(
            "state_dir={}",
            render_optional_path(settings.paths.state_dir.as_ref())
        ),
    ]);

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

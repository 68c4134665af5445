#![forbid(unsafe_code)]

use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use mx_core::settings_io::{load_settings, save_settings, settings_path};
use mx_core::{
    Coordinator, FileEntry, Settings, SortField, SortMode, StartOptions, TaskRequest,
    TransferMode, TransformOp, UpscaleOptions, UpscaleProfile, UpscaleTarget,
};
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthChar;

#[derive(Debug, Parser)]
#[command(version, about = "Background file and video tasks for the mx media browser")]
struct Cli {
    /// Settings file; defaults to ~/.config/mx/settings.ini.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = 100)]
    tick_rate_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy files or folders into a destination folder.
    Copy {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[arg(long, short)]
        to: PathBuf,
    },
    /// Move files or folders into a destination folder.
    Move {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[arg(long, short)]
        to: PathBuf,
    },
    Delete {
        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },
    /// Drop everything before `--at` seconds.
    TrimFront {
        source: PathBuf,
        #[arg(long)]
        at: f64,
    },
    /// Keep only the first `--at` seconds.
    TrimEnd {
        source: PathBuf,
        #[arg(long)]
        at: f64,
    },
    Flip {
        source: PathBuf,
    },
    /// Join two or more videos into one.
    Combine {
        #[arg(required = true, num_args = 2..)]
        sources: Vec<PathBuf>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Queue videos for upscaling with a JSON ticket each.
    Submit {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[arg(long, default_value = "4k")]
        target: UpscaleTarget,
        #[arg(long, default_value = "general")]
        profile: UpscaleProfile,
        #[arg(long, default_value_t = 0.0)]
        grain: f64,
        #[arg(long, default_value_t = 1)]
        gsize: u32,
    },
    /// List a folder the way the browser does, with probed metadata.
    List {
        dir: Option<PathBuf>,
        #[arg(long, default_value = "name")]
        sort: SortField,
        #[arg(long)]
        reverse: bool,
    },
    /// Write the current settings (or defaults) to the settings file.
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => settings_path().context("HOME is not set; pass --config")?,
    };
    let settings = load_settings(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    init_tracing(&settings)?;
    tracing::debug!(config = %config_path.display(), "settings loaded");

    let tick_rate = Duration::from_millis(cli.tick_rate_ms.max(1));
    match cli.command {
        Command::InitConfig { force } => init_config(&config_path, &settings, force),
        Command::List { dir, sort, reverse } => {
            let dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("failed to resolve current directory")?,
            };
            list_folder(dir, settings, SortMode { field: sort, reverse })
        }
        command => run_tasks(command, settings, tick_rate),
    }
}

fn init_tracing(settings: &Settings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mx=info,warn"));
    let Some(log_file) = settings.log_file() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(io::stderr)
            .try_init();
        return Ok(());
    };
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}

fn init_config(path: &Path, settings: &Settings, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    save_settings(path, settings).with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn working_folder(command: &Command) -> Result<PathBuf> {
    let first = match command {
        Command::Copy { to, .. } | Command::Move { to, .. } => Some(to.clone()),
        Command::Delete { targets } => targets.first().cloned(),
        Command::TrimFront { source, .. }
        | Command::TrimEnd { source, .. }
        | Command::Flip { source } => Some(source.clone()),
        Command::Combine { sources, .. } | Command::Submit { sources, .. } => {
            sources.first().cloned()
        }
        Command::List { .. } | Command::InitConfig { .. } => None,
    };
    let folder = first
        .as_deref()
        .and_then(|path| if path.is_dir() { Some(path) } else { path.parent() })
        .map(PathBuf::from);
    match folder {
        Some(folder) if !folder.as_os_str().is_empty() => Ok(folder),
        _ => std::env::current_dir().context("failed to resolve current directory"),
    }
}

fn run_tasks(command: Command, settings: Settings, tick_rate: Duration) -> Result<()> {
    let folder = working_folder(&command)?;
    let mut coordinator = Coordinator::new(folder, settings);
    let state = &mut coordinator.state;

    let started = match command {
        Command::Copy { sources, to } => state.start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Copy,
                sources,
                destination_dir: to,
            },
            StartOptions::default(),
        ),
        Command::Move { sources, to } => state.start_task(
            TaskRequest::Transfer {
                mode: TransferMode::Move,
                sources,
                destination_dir: to,
            },
            StartOptions::default(),
        ),
        Command::Delete { targets } => {
            state.start_task(TaskRequest::Delete { targets }, StartOptions::default())
        }
        Command::TrimFront { source, at } => state.start_task(
            TaskRequest::Transform {
                source,
                op: TransformOp::TrimFront { seconds: at },
            },
            StartOptions::default(),
        ),
        Command::TrimEnd { source, at } => state.start_task(
            TaskRequest::Transform {
                source,
                op: TransformOp::TrimEnd { seconds: at },
            },
            StartOptions::default(),
        ),
        Command::Flip { source } => state.start_task(
            TaskRequest::Transform {
                source,
                op: TransformOp::HorizontalFlip,
            },
            StartOptions::default(),
        ),
        Command::Combine { sources, output } => state.start_task(
            TaskRequest::Combine { sources, output },
            StartOptions::default(),
        ),
        Command::Submit {
            sources,
            target,
            profile,
            grain,
            gsize,
        } => state.submit_to_queue(
            sources,
            UpscaleOptions {
                target,
                profile,
                grain,
                grain_size: gsize,
            },
        ),
        Command::List { .. } | Command::InitConfig { .. } => {
            return Err(anyhow!("not a task command"));
        }
    };
    let id = started.context("task could not start")?;
    tracing::debug!(task_id = %id, "waiting for task");

    wait_with_status_line(&mut coordinator, tick_rate)?;

    let report = coordinator.state.finalize_transforms();
    for moved in &report.moved {
        println!("{}", moved.display());
    }
    for error in &report.errors {
        eprintln!("finalize failed: {error}");
    }

    let failures = coordinator.state.tasks().failures();
    for failure in &failures {
        if let Some(surface) = &failure.surface {
            eprintln!("== {}", surface.title);
            eprint!("{}", surface.text);
        }
    }
    if !failures.is_empty() || !report.errors.is_empty() {
        bail!("{} task(s) failed", failures.len().max(1));
    }
    Ok(())
}

fn wait_with_status_line(coordinator: &mut Coordinator, tick_rate: Duration) -> Result<()> {
    let interactive = io::stdout().is_terminal();
    let mut stdout = io::stdout();
    while coordinator.state.tasks().active_count() > 0 {
        coordinator.pump_timeout(tick_rate);
        if interactive {
            render_status_line(&mut stdout, &coordinator.state.status_text())?;
        }
    }
    coordinator.pump();
    if interactive {
        render_status_line(&mut stdout, "")?;
    }
    Ok(())
}

fn render_status_line(stdout: &mut io::Stdout, text: &str) -> Result<()> {
    let width = terminal::size().map_or(80, |(columns, _)| usize::from(columns));
    queue!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(truncate_to_width(text, width.saturating_sub(1)))
    )
    .context("failed to draw status line")?;
    stdout.flush().context("failed to flush status line")?;
    Ok(())
}

fn truncate_to_width(text: &str, width: usize) -> String {
    let mut used = 0;
    let mut truncated = String::new();
    for character in text.chars() {
        let char_width = character.width().unwrap_or(0);
        if used + char_width > width {
            break;
        }
        used += char_width;
        truncated.push(character);
    }
    truncated
}

fn list_folder(dir: PathBuf, settings: Settings, sort: SortMode) -> Result<()> {
    let probing = settings.tools.ffprobe_enabled;
    let mut coordinator = Coordinator::new(dir.clone(), settings);
    coordinator.state.sort = sort;
    coordinator
        .state
        .open_folder(dir.clone())
        .with_context(|| format!("cannot list {}", dir.display()))?;
    let timeout = Duration::from_secs(if probing { 600 } else { 30 });
    let finished =
        coordinator.wait_until(timeout, |state| !state.loading && !state.is_enriching());
    if !finished {
        bail!("listing {} timed out", dir.display());
    }
    for entry in &coordinator.state.entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

fn format_entry(entry: &FileEntry) -> String {
    if entry.is_dir {
        return format!("{}/", entry.name);
    }
    let mut line = format!("{:>12}  {}", entry.size, entry.name);
    if let Some(meta) = entry.meta {
        if let (Some(width), Some(height)) = (meta.width, meta.height) {
            line.push_str(&format!("  {width}x{height}"));
        }
        if let Some(duration) = meta.duration {
            line.push_str(&format!("  {duration:.1}s"));
        }
    }
    line
}

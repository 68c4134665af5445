use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::jobs::{InternalCode, ResultCode};

const READ_CHUNK_BYTES: usize = 8 * 1024;
const STDOUT: usize = 0;
const STDERR: usize = 1;

#[derive(Debug)]
pub enum HelperError {
    Spawn(io::Error),
    Pipe(io::Error),
}

impl fmt::Display for HelperError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(error) => write!(formatter, "failed to start helper: {error}"),
            Self::Pipe(error) => write!(formatter, "failed to read helper output: {error}"),
        }
    }
}

impl std::error::Error for HelperError {}

impl From<HelperError> for ResultCode {
    fn from(error: HelperError) -> Self {
        match error {
            HelperError::Spawn(_) => Self::Internal(InternalCode::HelperSpawn),
            HelperError::Pipe(_) => Self::Internal(InternalCode::Pipe),
        }
    }
}

pub fn render_command_line(program: &Path, args: &[OsString]) -> String {
    let words: Vec<String> = std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|word| word.to_string_lossy().into_owned())
        .collect();
    shlex::try_join(words.iter().map(String::as_str)).unwrap_or_else(|_| words.join(" "))
}

/// Runs `program` to completion in `cwd` and forwards its merged stdout and
/// stderr line by line. `\r` and `\n` both end a line; empty lines are
/// skipped. Returns the exit code, or -1 when the helper died from a signal.
///
/// There is no kill path: once launched the helper always runs to the end.
pub fn run_helper(
    program: &Path,
    args: &[OsString],
    cwd: &Path,
    mut on_line: impl FnMut(&str),
) -> Result<i32, HelperError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(HelperError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HelperError::Pipe(io::Error::other("failed to capture helper stdout")));
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HelperError::Pipe(io::Error::other("failed to capture helper stderr")));
    let (stdout, stderr) = match (stdout, stderr) {
        (Ok(stdout), Ok(stderr)) => (stdout, stderr),
        (Err(error), _) | (_, Err(error)) => {
            let _ = child.wait();
            return Err(error);
        }
    };

    let (chunk_tx, chunk_rx) = mpsc::channel::<(usize, Vec<u8>)>();
    let stdout_handle = spawn_reader(stdout, STDOUT, chunk_tx.clone());
    let stderr_handle = spawn_reader(stderr, STDERR, chunk_tx);

    // One partial-line buffer per stream so lines never interleave.
    let mut pending = [Vec::new(), Vec::new()];
    for (stream, chunk) in chunk_rx {
        let buffer = &mut pending[stream];
        buffer.extend_from_slice(&chunk);
        while let Some(end) = buffer.iter().position(|&byte| matches!(byte, b'\n' | b'\r')) {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            forward_line(&line[..line.len() - 1], &mut on_line);
        }
    }
    for buffer in &pending {
        forward_line(buffer, &mut on_line);
    }

    let stdout_result = join_reader(stdout_handle, "stdout");
    let stderr_result = join_reader(stderr_handle, "stderr");
    let status = child.wait().map_err(HelperError::Pipe)?;
    stdout_result?;
    stderr_result?;
    Ok(status.code().unwrap_or(-1))
}

fn forward_line(bytes: &[u8], on_line: &mut impl FnMut(&str)) {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim_end();
    if !line.is_empty() {
        on_line(line);
    }
}

fn spawn_reader(
    mut reader: impl Read + Send + 'static,
    stream: usize,
    sender: Sender<(usize, Vec<u8>)>,
) -> thread::JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let mut buffer = vec![0_u8; READ_CHUNK_BYTES];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            };
            if sender.send((stream, buffer[..read].to_vec())).is_err() {
                return Ok(());
            }
        }
    })
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<()>>,
    stream: &str,
) -> Result<(), HelperError> {
    handle
        .join()
        .map_err(|_| HelperError::Pipe(io::Error::other(format!("helper {stream} reader panicked"))))?
        .map_err(HelperError::Pipe)
}

use std::collections::{BTreeSet, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use crate::file_ops::{copy_file_cancelable, remove_dir_shallow, split_name, unique_name};
use crate::jobs::{InternalCode, ResultCode, TaskEnvironment, TaskOutput, display_name};
use crate::process_backend::{render_command_line, run_helper};

pub const WORKING_DIR_NAME: &str = "video_process";
pub const COMBINE_DIR_NAME: &str = "video_combine";
const COMBINED_INTERMEDIATE: &str = "combined.mpg";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransformOp {
    /// Drops everything before `seconds`.
    TrimFront { seconds: f64 },
    /// Keeps only the first `seconds`.
    TrimEnd { seconds: f64 },
    HorizontalFlip,
}

impl TransformOp {
    pub fn label(self) -> &'static str {
        match self {
            Self::TrimFront { .. } => "trim-front",
            Self::TrimEnd { .. } => "trim-end",
            Self::HorizontalFlip => "hflip",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::TrimFront { .. } => "Trim front",
            Self::TrimEnd { .. } => "Trim end",
            Self::HorizontalFlip => "Flip",
        }
    }

    fn output_suffix(self) -> &'static str {
        match self {
            Self::TrimFront { .. } => "trimfront",
            Self::TrimEnd { .. } => "trimend",
            Self::HorizontalFlip => "hflip",
        }
    }

    pub fn helper_args(self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        match self {
            Self::TrimFront { seconds } => {
                args.extend(["-ss".into(), format!("{seconds:.3}").into()]);
                args.extend(["-i".into(), input.into()]);
                args.extend(["-c".into(), "copy".into()]);
            }
            Self::TrimEnd { seconds } => {
                args.extend(["-i".into(), input.into()]);
                args.extend(["-t".into(), format!("{seconds:.3}").into()]);
                args.extend(["-c".into(), "copy".into()]);
            }
            Self::HorizontalFlip => {
                args.extend(["-i".into(), input.into()]);
                args.extend(["-vf".into(), "hflip".into(), "-c:a".into(), "copy".into()]);
            }
        }
        args.push(output.into());
        args
    }
}

fn fail(output: &mut TaskOutput, code: ResultCode, message: String) -> ResultCode {
    output.emit(format!("ERROR: {message}"));
    code
}

fn check_canceled(output: &mut TaskOutput) -> Result<(), ResultCode> {
    if output.is_canceled() {
        output.emit("Canceled.");
        return Err(ResultCode::Canceled);
    }
    Ok(())
}

fn run_stage(
    environment: &TaskEnvironment,
    args: &[OsString],
    cwd: &Path,
    output: &mut TaskOutput,
) -> Result<(), ResultCode> {
    output.emit(format!("> {}", render_command_line(&environment.ffmpeg, args)));
    let code = match run_helper(&environment.ffmpeg, args, cwd, |line| output.emit(line)) {
        Ok(code) => code,
        Err(error) => {
            let message = error.to_string();
            return Err(fail(output, ResultCode::from(error), message));
        }
    };
    if code != 0 {
        return Err(fail(
            output,
            ResultCode::Helper(code),
            format!("ffmpeg exited with code {code}"),
        ));
    }
    Ok(())
}

/// Copies `source` into `<dir>/video_process`, runs the helper on the copy
/// and replaces the copy with the result. Returns the processed file, which
/// still lives in the working directory until [`finalize_transforms`].
pub(crate) fn run_transform(
    source: &Path,
    op: TransformOp,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<PathBuf, ResultCode> {
    let (Some(directory), Some(name)) = (source.parent(), source.file_name()) else {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::MissingPath),
            format!("invalid source: {}", source.to_string_lossy()),
        ));
    };
    if !source.is_file() {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::MissingPath),
            format!("source is missing: {}", source.to_string_lossy()),
        ));
    }
    check_canceled(output)?;

    let working_dir = directory.join(WORKING_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&working_dir) {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::WorkingDir),
            format!("cannot create {}: {error}", working_dir.to_string_lossy()),
        ));
    }

    let label = format!("{} {}", op.verb(), display_name(source));
    output.progress(format!("{label}: copying input"));
    let cancel = output.cancel_token().clone();
    let input_copy = match unique_name(&working_dir, name).and_then(|input_copy| {
        copy_file_cancelable(source, &input_copy, environment.copy_chunk_bytes, &cancel)
            .map(|_| input_copy)
    }) {
        Ok(input_copy) => input_copy,
        Err(error) => {
            let code = ResultCode::from(error);
            if code.is_canceled() {
                output.emit("Canceled.");
                return Err(code);
            }
            return Err(fail(
                output,
                ResultCode::Internal(InternalCode::InputCopy),
                format!("failed to copy input into {}", working_dir.to_string_lossy()),
            ));
        }
    };
    output.emit(format!("input copy: {}", input_copy.to_string_lossy()));

    // Last checkpoint; the helper is never interrupted once launched.
    check_canceled(output)?;

    let input_name = input_copy.file_name().unwrap_or(name).to_os_string();
    let (stem, extension) = split_name(&input_name);
    let output_name = format!("{stem}_{}{extension}", op.output_suffix());
    let output_temp = match unique_name(&working_dir, OsStr::new(&output_name)) {
        Ok(path) => path,
        Err(error) => {
            return Err(fail(
                output,
                ResultCode::from(error),
                format!("no free output name in {}", working_dir.to_string_lossy()),
            ));
        }
    };
    let output_file = output_temp.file_name().unwrap_or(OsStr::new(&output_name));

    output.progress(format!("{label}: running ffmpeg"));
    let args = op.helper_args(Path::new(&input_name), Path::new(output_file));
    if let Err(code) = run_stage(environment, &args, &working_dir, output) {
        let _ = fs::remove_file(&output_temp);
        return Err(code);
    }

    if let Err(error) = fs::rename(&output_temp, &input_copy) {
        let message = format!(
            "cannot replace {} with {}: {error}",
            input_copy.to_string_lossy(),
            output_temp.to_string_lossy()
        );
        return Err(fail(output, ResultCode::from(error), message));
    }
    output.emit(format!("Done: {}", input_copy.to_string_lossy()));
    Ok(input_copy)
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct FinalizeReport {
    pub moved: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Moves each processed file out of its working directory into the folder
/// above it, under a free name, then removes the working directories
/// without recursing.
pub fn finalize_transforms(finals: &[PathBuf]) -> FinalizeReport {
    let mut report = FinalizeReport::default();
    let mut working_dirs = BTreeSet::new();

    for processed in finals {
        let (Some(working_dir), Some(name)) = (processed.parent(), processed.file_name()) else {
            continue;
        };
        working_dirs.insert(working_dir.to_path_buf());
        let Some(destination_dir) = working_dir.parent() else {
            continue;
        };
        let moved = unique_name(destination_dir, name).and_then(|destination| {
            fs::rename(processed, &destination).map(|()| destination)
        });
        match moved {
            Ok(destination) => {
                tracing::info!(
                    from = %processed.to_string_lossy(),
                    to = %destination.to_string_lossy(),
                    "finalized transform output"
                );
                report.moved.push(destination);
            }
            Err(error) => {
                tracing::warn!(path = %processed.to_string_lossy(), %error, "finalize failed");
                report
                    .errors
                    .push(format!("{}: {error}", processed.to_string_lossy()));
            }
        }
    }

    for working_dir in working_dirs {
        if let Err(error) = remove_dir_shallow(&working_dir) {
            tracing::debug!(
                path = %working_dir.to_string_lossy(),
                %error,
                "working directory left in place"
            );
        }
    }
    report
}

fn default_combined_target(first: &Path) -> std::io::Result<PathBuf> {
    let directory = first.parent().unwrap_or(Path::new("."));
    let name = first.file_name().unwrap_or(OsStr::new("combined.mp4"));
    let (stem, extension) = split_name(name);
    unique_name(directory, OsStr::new(&format!("{stem}_combined{extension}")))
}

fn has_duplicates(sources: &[PathBuf]) -> bool {
    let mut seen = HashSet::new();
    sources.iter().any(|source| {
        let key = fs::canonicalize(source).unwrap_or_else(|_| source.clone());
        !seen.insert(key)
    })
}

/// Converts every input to a high-quality MPEG intermediate, concatenates
/// the intermediates and re-encodes the result next to the first input.
pub(crate) fn run_combine(
    sources: &[PathBuf],
    target: Option<&Path>,
    output: &mut TaskOutput,
    environment: &TaskEnvironment,
) -> Result<PathBuf, ResultCode> {
    if sources.len() < 2 {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::MissingPath),
            String::from("combine needs at least two videos"),
        ));
    }
    // Helper stages run inside the staging folder, so every path handed to
    // them must be absolute.
    let sources = match sources
        .iter()
        .map(std::path::absolute)
        .collect::<std::io::Result<Vec<PathBuf>>>()
    {
        Ok(sources) => sources,
        Err(error) => {
            return Err(fail(
                output,
                ResultCode::Internal(InternalCode::MissingPath),
                format!("cannot resolve input path: {error}"),
            ));
        }
    };
    if let Some(missing) = sources.iter().find(|source| !source.is_file()) {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::MissingPath),
            format!("source is missing: {}", missing.to_string_lossy()),
        ));
    }
    if has_duplicates(&sources) {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::DuplicateInput),
            String::from("the same video was selected more than once"),
        ));
    }

    let combined = match target {
        Some(target) => std::path::absolute(target).map_err(|error| {
            fail(
                output,
                ResultCode::Internal(InternalCode::MissingPath),
                format!("cannot resolve output path: {error}"),
            )
        })?,
        None => default_combined_target(&sources[0]).map_err(|error| {
            fail(
                output,
                ResultCode::from(error),
                String::from("no free name for the combined video"),
            )
        })?,
    };
    let base_dir = combined.parent().unwrap_or(Path::new(".")).to_path_buf();
    let staging = unique_name(&base_dir, OsStr::new(COMBINE_DIR_NAME))
        .and_then(|staging| fs::create_dir(&staging).map(|()| staging))
        .map_err(|error| {
            fail(
                output,
                ResultCode::Internal(InternalCode::WorkingDir),
                format!("cannot create staging folder in {}: {error}", base_dir.to_string_lossy()),
            )
        })?;

    let total = sources.len();
    let mut parts = Vec::with_capacity(total);
    for (index, source) in sources.iter().enumerate() {
        check_canceled(output)?;
        output.progress(format!(
            "Combine {}/{total}: converting {}",
            index + 1,
            display_name(source)
        ));
        let part = format!("part_{index:03}.mpg");
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            source.into(),
            "-qscale:v".into(),
            "1".into(),
            part.clone().into(),
        ];
        run_stage(environment, &args, &staging, output)?;
        parts.push(part);
    }

    check_canceled(output)?;
    output.progress(format!("Combine: joining {total} part(s)"));
    let concat = format!("concat:{}", parts.join("|"));
    let args: Vec<OsString> = vec![
        "-y".into(),
        "-i".into(),
        concat.into(),
        "-c".into(),
        "copy".into(),
        COMBINED_INTERMEDIATE.into(),
    ];
    run_stage(environment, &args, &staging, output)?;

    check_canceled(output)?;
    output.progress(format!("Combine: encoding {}", display_name(&combined)));
    let args: Vec<OsString> = vec![
        "-y".into(),
        "-i".into(),
        COMBINED_INTERMEDIATE.into(),
        "-qscale:v".into(),
        "2".into(),
        combined.clone().into(),
    ];
    run_stage(environment, &args, &staging, output)?;

    if !combined.is_file() {
        return Err(fail(
            output,
            ResultCode::Internal(InternalCode::MissingPath),
            format!("ffmpeg produced no output at {}", combined.to_string_lossy()),
        ));
    }
    if let Err(error) = remove_dir_shallow(&staging) {
        tracing::debug!(path = %staging.to_string_lossy(), %error, "staging folder left in place");
    }
    output.emit(format!("Done: {}", combined.to_string_lossy()));
    Ok(combined)
}

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Host media player. Implementations report end of media by posting
/// [`crate::Event::EndReached`] to the coordinator.
pub trait MediaEngine: Send + fmt::Debug {
    fn play(&mut self, path: &Path) -> io::Result<()>;
    fn pause(&mut self, paused: bool);
    fn seek(&mut self, position_ms: u64);
    fn stop(&mut self);
    fn position_ms(&self) -> u64;
}

/// Engine without output, used by the command-line driver and tests.
#[derive(Debug, Default)]
pub struct NullEngine {
    current: Option<PathBuf>,
    position_ms: u64,
    paused: bool,
}

impl NullEngine {
    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl MediaEngine for NullEngine {
    fn play(&mut self, path: &Path) -> io::Result<()> {
        self.current = Some(path.to_path_buf());
        self.position_ms = 0;
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn seek(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
    }

    fn stop(&mut self) {
        self.current = None;
        self.position_ms = 0;
    }

    fn position_ms(&self) -> u64 {
        self.position_ms
    }
}

/// Work deferred until playback ends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PostAction {
    Delete,
    CopyTo(PathBuf),
    /// Applied synchronously on exit.
    Rename(PathBuf),
}

impl PostAction {
    /// Whether the action runs as a background task on exit.
    pub fn is_async(&self) -> bool {
        !matches!(self, Self::Rename(_))
    }
}

#[derive(Debug)]
pub struct PlaybackSession {
    playlist: Vec<PathBuf>,
    index: usize,
    post_actions: Vec<(PathBuf, PostAction)>,
    return_folder: PathBuf,
}

impl PlaybackSession {
    /// `None` when the playlist is empty.
    pub fn new(playlist: Vec<PathBuf>, return_folder: PathBuf) -> Option<Self> {
        if playlist.is_empty() {
            return None;
        }
        Some(Self {
            playlist,
            index: 0,
            post_actions: Vec::new(),
            return_folder,
        })
    }

    pub fn current(&self) -> Option<&Path> {
        self.playlist.get(self.index).map(PathBuf::as_path)
    }

    pub fn position(&self) -> (usize, usize) {
        (self.index + 1, self.playlist.len())
    }

    pub fn return_folder(&self) -> &Path {
        &self.return_folder
    }

    /// Moves to the next item; `false` at the end of the playlist.
    pub fn advance(&mut self) -> bool {
        if self.index + 1 < self.playlist.len() {
            self.index += 1;
            return true;
        }
        false
    }

    pub fn previous(&mut self) -> bool {
        if self.index > 0 {
            self.index -= 1;
            return true;
        }
        false
    }

    /// Queues `action` against the current item. A delete also drops the
    /// item from the playlist; returns `false` once nothing is left to play.
    pub fn queue(&mut self, action: PostAction) -> bool {
        let Some(current) = self.playlist.get(self.index).cloned() else {
            return false;
        };
        if action == PostAction::Delete {
            self.playlist.remove(self.index);
            if self.index >= self.playlist.len() {
                self.index = self.playlist.len().saturating_sub(1);
            }
        }
        self.post_actions.push((current, action));
        !self.playlist.is_empty()
    }

    pub fn post_actions(&self) -> &[(PathBuf, PostAction)] {
        &self.post_actions
    }

    pub fn into_post_actions(self) -> Vec<(PathBuf, PostAction)> {
        self.post_actions
    }
}

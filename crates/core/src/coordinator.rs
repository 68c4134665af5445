use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    AppState, Event, FfprobeProbe, MediaEngine, MetadataProbe, NullEngine, Settings, TaskFamily,
};

/// Owns the canonical state and the receiving end of the event channel.
/// Everything here runs on the thread that constructed it.
#[derive(Debug)]
pub struct Coordinator {
    pub state: AppState,
    events: Receiver<Event>,
}

impl Coordinator {
    /// Builds a coordinator with an ffprobe-backed probe (when enabled) and
    /// a silent media engine, and purges deletes left over from last run.
    pub fn new(folder: PathBuf, settings: Settings) -> Self {
        let probe = settings.tools.ffprobe_enabled.then(|| {
            Arc::new(FfprobeProbe::new(settings.tools.ffprobe_path.clone()))
                as Arc<dyn MetadataProbe>
        });
        let coordinator =
            Self::with_parts(folder, settings, Box::new(NullEngine::default()), probe);
        if let Some(deferred) = coordinator.state.deferred_deletes() {
            match deferred.purge() {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged deferred deletes"),
                Err(error) => tracing::warn!(%error, "deferred delete journal could not be read"),
            }
        }
        coordinator
    }

    pub fn with_parts(
        folder: PathBuf,
        settings: Settings,
        engine: Box<dyn MediaEngine>,
        probe: Option<Arc<dyn MetadataProbe>>,
    ) -> Self {
        let (event_tx, events) = mpsc::channel();
        Self {
            state: AppState::new(folder, settings, event_tx, engine, probe),
            events,
        }
    }

    fn drain(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.state.handle_event(event);
                    handled += 1;
                }
                // The state holds a sender, so the channel never disconnects.
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return handled,
            }
        }
    }

    /// Applies every queued event. Runs the playback exit barrier when the
    /// playlist ran out.
    pub fn pump(&mut self) -> usize {
        let handled = self.drain();
        if self.state.take_exit_request() {
            self.exit_playback();
        }
        handled
    }

    /// Blocks for up to `timeout` waiting for one event, then drains the rest.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.state.handle_event(event);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => self.pump(),
        }
    }

    /// Pumps until `done` holds or `timeout` elapses; returns whether it held.
    pub fn wait_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&AppState) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Waits for all running transforms while still servicing events, then
    /// returns to the folder view.
    pub fn exit_playback(&mut self) {
        if self.state.playback().is_none() {
            return;
        }
        self.state.engine_mut().stop();
        let poll = Duration::from_millis(self.state.settings.tasks.barrier_poll_ms.max(1));
        loop {
            self.drain();
            let running = self.state.tasks().running_count(TaskFamily::Transforms);
            if running == 0 {
                break;
            }
            self.state.title = format!("waiting on {running} transform task(s)...");
            tracing::debug!(task_event = "barrier_wait", running, "waiting on transforms");
            thread::sleep(poll);
        }
        self.state.finish_playback();
    }

    /// Pumps until no task is running.
    pub fn wait_idle(&mut self, poll: Duration) {
        while self.state.tasks().active_count() > 0 {
            self.pump_timeout(poll);
        }
        self.pump();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.state.shutdown();
    }
}

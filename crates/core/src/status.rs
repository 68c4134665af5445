use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;

use crate::Event;

const RUNNING_SEPARATOR: &str = "   ";

/// Appended to a task label once its cancel was requested.
pub const CANCELLING_SUFFIX: &str = " (cancelling...)";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusAction {
    Begin,
    Update,
    End,
}

/// Owned status mutation posted by a worker thread.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusMessage {
    pub action: StatusAction,
    pub id: u64,
    pub text: String,
}

/// Renders every concurrently running operation as a single status line.
///
/// Ids live on a LIFO stack; the line always shows the most recently begun
/// operation that is still running. Ended ids stay on the stack until they
/// surface at the top, or until the stack grows past twice the live count.
#[derive(Debug)]
pub struct StatusTracker {
    labels: HashMap<u64, String>,
    stack: Vec<u64>,
    ids: Arc<AtomicU64>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
            stack: Vec::new(),
            ids: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn begin(&mut self, label: impl Into<String>) -> u64 {
        let id = allocate(&self.ids);
        self.insert(id, label.into());
        id
    }

    pub fn update(&mut self, id: u64, label: impl Into<String>) -> bool {
        match self.labels.get_mut(&id) {
            Some(current) => {
                *current = label.into();
                true
            }
            None => false,
        }
    }

    pub fn end(&mut self, id: u64) -> bool {
        if self.labels.remove(&id).is_none() {
            return false;
        }
        while self
            .stack
            .last()
            .is_some_and(|top| !self.labels.contains_key(top))
        {
            self.stack.pop();
        }
        if self.stack.len() > self.labels.len() * 2 {
            let labels = &self.labels;
            self.stack.retain(|id| labels.contains_key(id));
        }
        true
    }

    pub fn apply(&mut self, message: StatusMessage) {
        match message.action {
            StatusAction::Begin => self.insert(message.id, message.text),
            StatusAction::Update => {
                self.update(message.id, message.text);
            }
            StatusAction::End => {
                self.end(message.id);
            }
        }
    }

    pub fn label(&self, id: u64) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn running(&self) -> usize {
        self.labels.len()
    }

    pub fn text(&self) -> String {
        let Some(label) = self.stack.last().and_then(|top| self.labels.get(top)) else {
            return String::new();
        };
        let running = self.labels.len();
        if running > 1 {
            format!("{label}{RUNNING_SEPARATOR}({running} running)")
        } else {
            label.clone()
        }
    }

    /// Worker-side handle sharing this tracker's id space.
    pub fn handle(&self, sender: Sender<Event>) -> StatusHandle {
        StatusHandle {
            ids: Arc::clone(&self.ids),
            sender,
        }
    }

    #[cfg(test)]
    fn stack_len(&self) -> usize {
        self.stack.len()
    }

    fn insert(&mut self, id: u64, label: String) {
        if self.labels.insert(id, label).is_none() {
            self.stack.push(id);
        }
    }
}

fn allocate(ids: &AtomicU64) -> u64 {
    ids.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

#[derive(Clone, Debug)]
pub struct StatusHandle {
    ids: Arc<AtomicU64>,
    sender: Sender<Event>,
}

impl StatusHandle {
    pub fn begin(&self, label: impl Into<String>) -> u64 {
        let id = allocate(&self.ids);
        self.post(StatusAction::Begin, id, label.into());
        id
    }

    pub fn update(&self, id: u64, label: impl Into<String>) {
        self.post(StatusAction::Update, id, label.into());
    }

    pub fn end(&self, id: u64) {
        self.post(StatusAction::End, id, String::new());
    }

    fn post(&self, action: StatusAction, id: u64, text: String) {
        // The coordinator may already be gone during shutdown.
        let _ = self
            .sender
            .send(Event::Status(StatusMessage { action, id, text }));
    }
}

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Carried by each task that belongs to a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchTag {
    pub batch: BatchId,
    pub counts: bool,
}

impl BatchTag {
    pub fn counted(batch: BatchId) -> Self {
        Self {
            batch,
            counts: true,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FollowUp {
    ReloadFolder(PathBuf),
}

#[derive(Debug)]
struct Batch {
    pending: usize,
    target: PathBuf,
    follow_up_requested: bool,
}

#[derive(Debug)]
pub struct BatchTracker {
    next_id: u64,
    batches: HashMap<BatchId, Batch>,
}

impl Default for BatchTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchTracker {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            batches: HashMap::new(),
        }
    }

    pub fn open(&mut self, target: PathBuf, pending: usize, follow_up_requested: bool) -> BatchId {
        let id = BatchId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.batches.insert(
            id,
            Batch {
                pending,
                target,
                follow_up_requested,
            },
        );
        id
    }

    /// Counts one completion. Returns the follow-up when this completion
    /// drained the batch; the batch is forgotten in the same step so the
    /// follow-up can only be handed out once.
    pub fn complete(&mut self, id: BatchId) -> Option<FollowUp> {
        let batch = self.batches.get_mut(&id)?;
        batch.pending = batch.pending.saturating_sub(1);
        if batch.pending > 0 {
            return None;
        }
        let batch = self.batches.remove(&id)?;
        tracing::debug!(batch_event = "drained", batch_id = %id, "batch completed");
        batch
            .follow_up_requested
            .then(|| FollowUp::ReloadFolder(batch.target))
    }

    pub fn pending(&self, id: BatchId) -> Option<usize> {
        self.batches.get(&id).map(|batch| batch.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

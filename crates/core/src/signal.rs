use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use tokio_util::sync::CancellationToken;

/// Epoch value captured by a background job when it starts.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Monotonic counter shared between the coordinator and the workers of one
/// background stream. Only the coordinator advances it.
#[derive(Clone, Debug, Default)]
pub struct GenerationCounter {
    value: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidates all outstanding work and returns the generation for the
    /// work about to start.
    pub fn advance(&self) -> Generation {
        Generation(self.value.fetch_add(1, Ordering::SeqCst).wrapping_add(1))
    }

    pub fn current(&self) -> Generation {
        Generation(self.value.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    pub fn guard(&self, generation: Generation) -> GenerationGuard {
        GenerationGuard {
            value: Arc::clone(&self.value),
            generation,
        }
    }
}

/// Worker-side view of a counter. Checked at cheap checkpoints.
#[derive(Clone, Debug)]
pub struct GenerationGuard {
    value: Arc<AtomicU64>,
    generation: Generation,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.value.load(Ordering::SeqCst) != self.generation.0
    }
}

use tokio::{sync::mpsc, task::JoinHandle};

use crate::reader::{ReadReport, ReaderError, Termination};

/// Progress notifications of a spawned reader, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// A read completed and its bytes were written to the sink.
    Chunk {
        /// Tag of the read, starting at 0.
        iteration: u64,
        /// File offset the read started at.
        offset: u64,
        /// Number of bytes the read returned.
        bytes_read: usize,
    },
    /// The loop reached a terminal state and the file handle was released.
    Finished(Termination),
}

/// A reader running on its own task.
#[derive(Debug)]
pub struct ReadHandle {
    events: mpsc::UnboundedReceiver<ReadEvent>,
    task: JoinHandle<ReadReport>,
}

impl ReadHandle {
    pub(super) const fn new(
        events: mpsc::UnboundedReceiver<ReadEvent>,
        task: JoinHandle<ReadReport>,
    ) -> Self {
        Self { events, task }
    }

    /// Waits for the next progress event. Returns `None` once the reader is gone and every
    /// event has been received.
    pub async fn next_event(&mut self) -> Option<ReadEvent> {
        self.events.recv().await
    }

    /// Whether the reader task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the reader to finish and returns its report.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::Task` if the reader task panicked or was aborted.
    pub async fn join(self) -> Result<ReadReport, ReaderError> {
        Ok(self.task.await?)
    }
}

//! Chunked asynchronous file reading.
//!
//! A [`ChunkedReader`] reads a file front to back with fixed-size reads issued on tokio's
//! blocking file pool. Exactly one read is in flight at a time: the next one is only issued
//! after the previous completion has been inspected. Each completion either continues the loop,
//! ends it normally, or ends it with an error, and the file handle is closed exactly once on
//! every one of those paths.
//!
//! The loop is an explicit state machine ([`ReadState`]) instead of nested completion
//! callbacks. It can be driven inline with [`ChunkedReader::run`], or moved onto its own task
//! with [`ChunkedReader::spawn`], which reports progress as [`ReadEvent`]s.

mod handle;

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

pub use handle::{ReadEvent, ReadHandle};

/// Capacity of the read buffer unless configured otherwise.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Errors of the chunked reader.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// The source file could not be opened or its size read.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// The file that was being opened.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A buffer of zero bytes can never make progress.
    #[error("read buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// A read failed.
    #[error("read at offset {offset} failed: {source}")]
    Read {
        /// Where the failed read started.
        offset: u64,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Writing read bytes to the sink failed.
    #[error("writing to the sink failed: {0}")]
    Sink(#[source] io::Error),

    /// Releasing the file handle failed.
    #[error("closing the file failed: {0}")]
    Close(#[source] io::Error),

    /// A read was attempted after the handle was closed.
    #[error("the file handle is already closed")]
    HandleClosed,

    /// The task driving a spawned reader panicked or was cancelled.
    #[error("reader task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Whether the reader still holds its file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The handle is open; no terminal state has been reached.
    Open,
    /// The handle has been released.
    Closed,
}

/// How a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A read found no bytes left. This is the abnormal end: it only happens for empty files or
    /// when the last full-buffer read ended exactly at the end of the file.
    EndOfStream,
    /// A read returned the whole file or fewer bytes than the buffer holds.
    Complete,
    /// A read, sink write or close failed.
    Failed,
}

/// The summary of a finished read loop.
#[derive(Debug)]
pub struct ReadReport {
    /// How the loop ended.
    pub termination: Termination,
    /// The error behind [`Termination::Failed`].
    pub error: Option<ReaderError>,
    /// Number of read completions observed, including a final end-of-stream read.
    pub reads: u64,
    /// Number of bytes handed to the sink.
    pub bytes_read: u64,
    /// Size of the file when it was opened.
    pub file_size: u64,
    /// Time from opening the file to reaching the terminal state.
    pub elapsed: Duration,
    /// State of the file handle after the loop; always [`HandleState::Closed`].
    pub handle: HandleState,
}

/// States of the read loop.
#[derive(Debug)]
enum ReadState {
    /// A read of up to one buffer is due at `offset`, tagged with `iteration`.
    Reading { offset: u64, iteration: u64 },
    /// The loop ended without error.
    Done(Termination),
    /// The loop ended with an error.
    Failed(ReaderError),
}

/// A fixed-capacity buffer reused for every read. `filled` marks the valid prefix.
#[derive(Debug)]
struct ReadBuffer {
    data: Box<[u8]>,
    filled: usize,
}

impl ReadBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    fn reset(&mut self) {
        self.filled = 0;
    }
}

/// Reads one file sequentially in fixed-size chunks.
#[derive(Debug)]
pub struct ChunkedReader {
    path: PathBuf,
    file: Option<File>,
    file_size: u64,
    buffer: ReadBuffer,
    started: Instant,
}

impl ChunkedReader {
    /// Opens `path` read-only with a [`DEFAULT_BUFFER_CAPACITY`] buffer.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::Open` if the file cannot be opened or its size read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        Self::open_with_capacity(path, DEFAULT_BUFFER_CAPACITY).await
    }

    /// Opens `path` read-only with a buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError::ZeroCapacity` for a zero capacity and `ReaderError::Open` if the
    /// file cannot be opened or its size read.
    pub async fn open_with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, ReaderError> {
        if capacity == 0 {
            return Err(ReaderError::ZeroCapacity);
        }

        let path = path.as_ref().to_path_buf();
        let open_error = |source| ReaderError::Open {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .await
            .map_err(open_error)?;
        // tokio caps a single read at 2 MiB by default; a read must be able to fill the buffer.
        file.set_max_buf_size(capacity);
        let started = Instant::now();
        let file_size = file.metadata().await.map_err(open_error)?.len();

        info!(path = %path.display(), file_size, capacity, "opened file for chunked reading");
        Ok(Self {
            path,
            file: Some(file),
            file_size,
            buffer: ReadBuffer::with_capacity(capacity),
            started,
        })
    }

    /// Size of the file when it was opened.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Capacity of the read buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Whether the file handle is still held.
    #[must_use]
    pub const fn handle_state(&self) -> HandleState {
        if self.file.is_some() {
            HandleState::Open
        } else {
            HandleState::Closed
        }
    }

    /// Reads the whole file into `sink` and returns once a terminal state is reached.
    ///
    /// Read, sink and close failures do not surface as an `Err`; they end the loop with
    /// [`Termination::Failed`] and are carried in [`ReadReport::error`].
    pub async fn run<S: AsyncWrite + Unpin + Send + ?Sized>(self, sink: &mut S) -> ReadReport {
        self.drive(sink, None).await
    }

    /// Moves the read loop onto a new tokio task and returns immediately.
    ///
    /// The caller can do other work while reads are in flight, follow progress with
    /// [`ReadHandle::next_event`] and collect the result with [`ReadHandle::join`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: AsyncWrite + Unpin + Send + 'static>(self, mut sink: S) -> ReadHandle {
        let (events, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { self.drive(&mut sink, Some(&events)).await });
        ReadHandle::new(receiver, task)
    }

    async fn drive<S: AsyncWrite + Unpin + Send + ?Sized>(
        mut self,
        sink: &mut S,
        events: Option<&mpsc::UnboundedSender<ReadEvent>>,
    ) -> ReadReport {
        let mut reads = 0;
        let mut bytes_read = 0;
        let mut state = ReadState::Reading {
            offset: 0,
            iteration: 0,
        };

        let outcome = loop {
            state = match state {
                ReadState::Reading { offset, iteration } => {
                    let (delivered, next) = self.step(sink, offset, iteration).await;
                    reads += 1;
                    if delivered > 0 {
                        bytes_read += delivered as u64;
                        notify(
                            events,
                            ReadEvent::Chunk {
                                iteration,
                                offset,
                                bytes_read: delivered,
                            },
                        );
                    }
                    next
                }
                ReadState::Done(termination) => break Ok(termination),
                ReadState::Failed(error) => break Err(error),
            };
        };

        let outcome = match outcome {
            Ok(termination) => match sink.flush().await {
                Ok(()) => Ok(termination),
                Err(source) => Err(ReaderError::Sink(source)),
            },
            Err(error) => Err(error),
        };
        let close = self.close().await;
        let elapsed = self.started.elapsed();

        let (termination, error) = match (outcome, close) {
            (Ok(termination), Ok(())) => (termination, None),
            (Ok(_), Err(error)) | (Err(error), _) => (Termination::Failed, Some(error)),
        };

        match termination {
            Termination::Complete => {
                info!(path = %self.path.display(), reads, bytes_read, elapsed_ns = elapsed.as_nanos(), "chunked read complete");
            }
            Termination::EndOfStream => {
                warn!(path = %self.path.display(), reads, bytes_read, elapsed_ns = elapsed.as_nanos(), "chunked read ended at end of stream");
            }
            Termination::Failed => {
                if let Some(error) = &error {
                    error!(path = %self.path.display(), reads, bytes_read, error = %error, "chunked read failed");
                }
            }
        }
        notify(events, ReadEvent::Finished(termination));

        ReadReport {
            termination,
            error,
            reads,
            bytes_read,
            file_size: self.file_size,
            elapsed,
            handle: self.handle_state(),
        }
    }

    /// Performs one read and decides the next state from its completion.
    ///
    /// Returns the number of bytes handed to the sink alongside the next state.
    async fn step<S: AsyncWrite + Unpin + Send + ?Sized>(
        &mut self,
        sink: &mut S,
        offset: u64,
        iteration: u64,
    ) -> (usize, ReadState) {
        let read = match self.read_at(offset).await {
            Ok(read) => read,
            Err(error) => return (0, ReadState::Failed(error)),
        };

        if read == 0 {
            return (0, ReadState::Done(Termination::EndOfStream));
        }

        debug!(iteration = iteration + 1, offset, bytes = read, "read completed");

        if let Err(source) = sink.write_all(self.buffer.filled()).await {
            return (0, ReadState::Failed(ReaderError::Sink(source)));
        }
        self.buffer.reset();

        if read as u64 == self.file_size || read < self.buffer.capacity() {
            return (read, ReadState::Done(Termination::Complete));
        }

        let iteration = iteration + 1;
        // The next position is derived from the last chunk size, not accumulated. A follow-up
        // read only happens after a full buffer, so this equals `capacity * iteration`.
        let next = ReadState::Reading {
            offset: read as u64 * iteration,
            iteration,
        };
        (read, next)
    }

    /// Reads up to one buffer at `offset`. Returns the number of bytes now in the buffer.
    async fn read_at(&mut self, offset: u64) -> Result<usize, ReaderError> {
        let file = self.file.as_mut().ok_or(ReaderError::HandleClosed)?;
        let read_error = |source| ReaderError::Read { offset, source };

        file.seek(SeekFrom::Start(offset)).await.map_err(read_error)?;
        let read = file.read(&mut self.buffer.data).await.map_err(read_error)?;
        self.buffer.filled = read;
        Ok(read)
    }

    /// Releases the file handle. Calling it again after the handle is gone does nothing.
    async fn close(&mut self) -> Result<(), ReaderError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        // Waits for any operation still queued on the blocking pool before the handle drops.
        file.flush().await.map_err(ReaderError::Close)?;
        debug!(path = %self.path.display(), "closed file handle");
        Ok(())
    }
}

fn notify(events: Option<&mpsc::UnboundedSender<ReadEvent>>, event: ReadEvent) {
    if let Some(events) = events {
        // The receiver may have been dropped by a caller that only wants the report.
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use sha2::{Digest, Sha256};
    use tempfile::NamedTempFile;

    use crate::reader::{
        ChunkedReader, DEFAULT_BUFFER_CAPACITY, HandleState, ReadEvent, ReaderError, Termination,
    };

    fn fixture(len: usize) -> (NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[tokio::test]
    async fn file_smaller_than_buffer_is_read_in_one_go() {
        let (file, data) = fixture(100);
        let reader = ChunkedReader::open(file.path()).await.unwrap();
        assert_eq!(reader.handle_state(), HandleState::Open);
        assert_eq!(reader.capacity(), DEFAULT_BUFFER_CAPACITY);

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert!(report.error.is_none());
        assert_eq!(report.reads, 1);
        assert_eq!(report.bytes_read, 100);
        assert_eq!(report.handle, HandleState::Closed);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn file_equal_to_buffer_completes_on_size_match() {
        let (file, data) = fixture(16);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.reads, 1);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn larger_file_ends_on_short_read() {
        let (file, data) = fixture(56);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.reads, 4);
        assert_eq!(report.bytes_read, 56);
        assert_eq!(report.file_size, 56);
        assert_eq!(report.handle, HandleState::Closed);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn exact_multiple_of_buffer_ends_at_end_of_stream() {
        let (file, data) = fixture(48);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::EndOfStream);
        assert_eq!(report.reads, 4);
        assert_eq!(report.bytes_read, 48);
        assert_eq!(report.handle, HandleState::Closed);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn empty_file_ends_at_end_of_stream() {
        let (file, _) = fixture(0);
        let reader = ChunkedReader::open(file.path()).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::EndOfStream);
        assert!(report.error.is_none());
        assert_eq!(report.reads, 1);
        assert_eq!(report.bytes_read, 0);
        assert_eq!(report.handle, HandleState::Closed);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn default_buffer_reads_multi_chunk_file_intact() {
        let (file, data) = fixture(20_000);
        let reader = ChunkedReader::open(file.path()).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.reads, 3);
        assert_eq!(Sha256::digest(&sink), Sha256::digest(&data));
    }

    #[tokio::test]
    async fn each_sink_write_is_exactly_one_chunk() {
        let (file, data) = fixture(20);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();
        let mut sink = tokio_test::io::Builder::new()
            .write(&data[..16])
            .write(&data[16..])
            .build();

        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.bytes_read, 20);
    }

    #[tokio::test]
    async fn sink_failure_stops_the_loop_and_closes_the_handle() {
        let (file, _) = fixture(40);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();
        let mut sink = tokio_test::io::Builder::new()
            .write_error(std::io::Error::other("sink full"))
            .build();

        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Failed);
        assert!(matches!(report.error, Some(ReaderError::Sink(_))));
        assert_eq!(report.reads, 1);
        assert_eq!(report.bytes_read, 0);
        assert_eq!(report.handle, HandleState::Closed);
    }

    #[tokio::test]
    async fn buffer_larger_than_two_mib_reads_the_whole_file() {
        const MIB: usize = 1024 * 1024;
        let (file, data) = fixture(6 * MIB);
        let reader = ChunkedReader::open_with_capacity(file.path(), 4 * MIB)
            .await
            .unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.reads, 2);
        assert_eq!(report.bytes_read, data.len() as u64);
        assert_eq!(sink.len(), data.len());
        assert_eq!(Sha256::digest(&sink), Sha256::digest(&data));
    }

    #[tokio::test]
    async fn read_failure_stops_the_loop_and_closes_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ChunkedReader::open(dir.path()).await.unwrap();

        let mut sink = Vec::new();
        let report = reader.run(&mut sink).await;

        assert_eq!(report.termination, Termination::Failed);
        assert!(matches!(report.error, Some(ReaderError::Read { offset: 0, .. })));
        assert_eq!(report.reads, 1);
        assert_eq!(report.bytes_read, 0);
        assert_eq!(report.handle, HandleState::Closed);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn missing_file_fails_to_open() {
        let result = ChunkedReader::open("/definitely/not/a/file.bin").await;

        assert!(matches!(result, Err(ReaderError::Open { .. })));
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let (file, _) = fixture(4);
        let result = ChunkedReader::open_with_capacity(file.path(), 0).await;

        assert!(matches!(result, Err(ReaderError::ZeroCapacity)));
    }

    #[tokio::test]
    async fn closed_handle_refuses_reads_and_closes_once() {
        let (file, _) = fixture(4);
        let mut reader = ChunkedReader::open(file.path()).await.unwrap();

        reader.close().await.unwrap();
        reader.close().await.unwrap();

        assert_eq!(reader.handle_state(), HandleState::Closed);
        assert!(matches!(reader.read_at(0).await, Err(ReaderError::HandleClosed)));
    }

    #[tokio::test]
    async fn spawned_reader_reports_chunks_in_order() {
        let (file, _) = fixture(40);
        let reader = ChunkedReader::open_with_capacity(file.path(), 16).await.unwrap();

        let mut handle = reader.spawn(tokio::io::sink());
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }

        assert_eq!(
            events,
            [
                ReadEvent::Chunk {
                    iteration: 0,
                    offset: 0,
                    bytes_read: 16
                },
                ReadEvent::Chunk {
                    iteration: 1,
                    offset: 16,
                    bytes_read: 16
                },
                ReadEvent::Chunk {
                    iteration: 2,
                    offset: 32,
                    bytes_read: 8
                },
                ReadEvent::Finished(Termination::Complete),
            ]
        );
        assert!(handle.is_finished());
        let report = handle.join().await.unwrap();
        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.handle, HandleState::Closed);
    }

    #[tokio::test]
    async fn spawned_reader_runs_without_the_caller_waiting() {
        let (file, data) = fixture(DEFAULT_BUFFER_CAPACITY * 4 + 1);
        let reader = ChunkedReader::open(file.path()).await.unwrap();

        let handle = reader.spawn(tokio::io::sink());
        let unrelated_work: u64 = (1..=1000).sum();
        let report = handle.join().await.unwrap();

        assert_eq!(unrelated_work, 500_500);
        assert_eq!(report.termination, Termination::Complete);
        assert_eq!(report.bytes_read, data.len() as u64);
        assert_eq!(report.reads, 5);
    }
}

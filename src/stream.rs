//! Byte streams shared by every collaborator
//!
//! [`StreamDuplicator`] fans one read-once stream out to independent
//! branches, and [`pipe`] is the bounded producer/consumer handoff used by
//! the resize pipeline.

use crate::{Error, Result};
use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// Forward-only stream of encoded image bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Size of the chunks [`PipeWriter::write_all`] splits its input into.
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

pub fn from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    if data.is_empty() {
        return Box::pin(stream::empty());
    }
    Box::pin(stream::once(async move { Ok(data) }))
}

pub fn from_chunks(chunks: Vec<Bytes>) -> ByteStream {
    Box::pin(stream::iter(chunks.into_iter().map(Ok)))
}

/// Drains a stream into memory.
pub async fn collect(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

struct TeeState {
    source: Option<ByteStream>,
    chunks: Vec<Bytes>,
    failure: Option<String>,
}

impl TeeState {
    /// Returns chunk `index`, pulling it from the source if no branch has yet.
    async fn chunk_at(&mut self, index: usize) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.get(index) {
            return Ok(Some(chunk.clone()));
        }
        if let Some(message) = &self.failure {
            return Err(Error::Pipe(message.clone()));
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        match source.next().await {
            Some(Ok(chunk)) => {
                self.chunks.push(chunk.clone());
                Ok(Some(chunk))
            }
            Some(Err(e)) => {
                self.failure = Some(e.to_string());
                self.source = None;
                Err(e)
            }
            None => {
                self.source = None;
                Ok(None)
            }
        }
    }
}

/// Owns the buffer behind a fanned-out read-once stream.
///
/// Each [`branch`](Self::branch) replays every chunk from the start. The
/// branch furthest ahead pulls from the source; the rest read the buffer, so
/// output begins before the payload is complete and the source is read once.
#[derive(Clone)]
pub struct StreamDuplicator {
    state: Arc<Mutex<TeeState>>,
}

impl StreamDuplicator {
    pub fn new(source: ByteStream) -> Self {
        Self {
            state: Arc::new(Mutex::new(TeeState {
                source: Some(source),
                chunks: Vec::new(),
                failure: None,
            })),
        }
    }

    pub fn branch(&self) -> ByteStream {
        let state = Arc::clone(&self.state);
        Box::pin(try_stream! {
            let mut index = 0;
            loop {
                let next = state.lock().await.chunk_at(index).await?;
                match next {
                    Some(chunk) => {
                        index += 1;
                        yield chunk;
                    }
                    None => break,
                }
            }
        })
    }

    /// Bytes captured from the source so far.
    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.chunks.iter().map(Bytes::len).sum()
    }
}

/// Splits a read-once stream into two independent read-once streams.
pub fn duplicate(source: ByteStream) -> (ByteStream, ByteStream) {
    let duplicator = StreamDuplicator::new(source);
    (duplicator.branch(), duplicator.branch())
}

/// Write end of a bounded byte pipe.
pub struct PipeWriter {
    tx: mpsc::Sender<Result<Bytes>>,
}

impl PipeWriter {
    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| Error::Pipe("pipe reader dropped".to_string()))
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(PIPE_CHUNK_SIZE) {
            self.write(Bytes::copy_from_slice(chunk)).await?;
        }
        Ok(())
    }

    /// Terminates the reader with `err` instead of a clean end of stream.
    pub async fn fail(&mut self, err: &Error) {
        // The reader may already be gone; nothing is waiting for the error then.
        let _ = self.tx.send(Err(Error::Pipe(err.to_string()))).await;
    }
}

/// Bounded pipe holding at most `capacity` in-flight chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeWriter { tx }, Box::pin(ReceiverStream::new(rx)))
}

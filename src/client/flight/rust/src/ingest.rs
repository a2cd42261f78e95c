/* src/client/flight/rust/src/ingest.rs */

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::errors::FlightStreamError;
use crate::record::FlightRecord;

#[derive(Default)]
struct IngestState {
  bootstrapped: bool,
  buffer: Vec<Bytes>,
  writer: Option<UnboundedSender<Bytes>>,
  reader_registered: bool,
  /// The document finished loading; no more records will be pushed.
  loaded: bool,
  /// The reader has been handed every chunk and closed.
  flushed: bool,
  form_state: Option<Value>,
}

/// Push-based ingestion of inline flight records.
///
/// Records may arrive before anything is ready to consume them, so data
/// chunks are buffered until `register_reader` is called. From then on
/// chunks are forwarded directly. `close` marks the end of the document;
/// the reader's stream ends once every chunk has been delivered.
pub struct FlightIngest {
  state: Mutex<IngestState>,
}

impl FlightIngest {
  pub fn new() -> Self {
    Self { state: Mutex::new(IngestState::default()) }
  }

  /// Parse and push one raw record, e.g. `[1,"0:{...}"]`.
  pub fn push_raw(&self, raw: &str) -> Result<(), FlightStreamError> {
    self.push(FlightRecord::parse(raw)?)
  }

  pub fn push(&self, record: FlightRecord) -> Result<(), FlightStreamError> {
    let mut state = self.state.lock();
    match record {
      FlightRecord::Bootstrap => {
        state.bootstrapped = true;
        state.buffer.clear();
      }
      FlightRecord::FormState(form) => state.form_state = Some(form),
      data => {
        if !state.bootstrapped {
          return Err(FlightStreamError::MissingBootstrap);
        }
        let Some(chunk) = data.into_chunk() else {
          return Ok(());
        };
        if state.flushed {
          tracing::trace!(len = chunk.len(), "flight chunk after flush, discarding");
        } else if let Some(writer) = &state.writer {
          if writer.send(chunk).is_err() {
            tracing::trace!("flight reader dropped, discarding chunk");
          }
        } else {
          state.buffer.push(chunk);
        }
      }
    }
    Ok(())
  }

  /// Attach the single consumer. Buffered chunks are replayed first.
  pub fn register_reader(&self) -> Result<FlightReader, FlightStreamError> {
    let mut state = self.state.lock();
    if state.reader_registered {
      return Err(FlightStreamError::ReaderAlreadyRegistered);
    }
    state.reader_registered = true;

    let (tx, rx) = mpsc::unbounded_channel();
    for chunk in state.buffer.drain(..) {
      // rx is alive in this scope, send cannot fail
      let _ = tx.send(chunk);
    }
    if state.loaded {
      state.flushed = true;
    } else {
      state.writer = Some(tx);
    }
    Ok(FlightReader { inner: UnboundedReceiverStream::new(rx) })
  }

  /// Signal that the document finished loading.
  pub fn close(&self) {
    let mut state = self.state.lock();
    if state.writer.take().is_some() {
      state.flushed = true;
    }
    state.loaded = true;
  }

  /// Form state delivered through the `[2, ...]` sideband, if any.
  pub fn form_state(&self) -> Option<Value> {
    self.state.lock().form_state.clone()
  }
}

impl Default for FlightIngest {
  fn default() -> Self {
    Self::new()
  }
}

/// Byte stream handed to the payload decoder.
pub struct FlightReader {
  inner: UnboundedReceiverStream<Bytes>,
}

impl Stream for FlightReader {
  type Item = Bytes;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    Pin::new(&mut self.inner).poll_next(cx)
  }
}

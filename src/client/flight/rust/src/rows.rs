/* src/client/flight/rust/src/rows.rs */

use bytes::{Buf, BytesMut};
use memchr::memchr;
use serde_json::Value;

use crate::errors::FlightStreamError;

/// One `<id>:<json>` line of a flight payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  pub id: String,
  pub value: Value,
}

impl Row {
  fn parse(line: &[u8]) -> Result<Self, FlightStreamError> {
    let line = std::str::from_utf8(line)
      .map_err(|e| FlightStreamError::MalformedRow(format!("invalid utf-8: {e}")))?;
    let (id, json) = line
      .split_once(':')
      .ok_or_else(|| FlightStreamError::MalformedRow(format!("missing row id in {line:?}")))?;
    if id.is_empty() {
      return Err(FlightStreamError::MalformedRow("empty row id".to_string()));
    }
    Ok(Self { id: id.to_string(), value: serde_json::from_str(json)? })
  }
}

/// Incremental line splitter. Chunk boundaries may fall anywhere, including
/// inside a multi-byte character.
#[derive(Debug, Default)]
pub struct RowDecoder {
  pending: BytesMut,
  /// Bytes of `pending` already known to contain no newline.
  scanned: usize,
}

impl RowDecoder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Buffer a chunk; complete rows are then taken with [`RowDecoder::next_row`].
  pub fn push(&mut self, chunk: &[u8]) {
    self.pending.extend_from_slice(chunk);
  }

  /// Next complete row, or `None` until more input arrives. A malformed row
  /// is consumed with its error, so decoding resumes at the following line.
  pub fn next_row(&mut self) -> Option<Result<Row, FlightStreamError>> {
    loop {
      let Some(offset) = memchr(b'\n', &self.pending[self.scanned..]) else {
        self.scanned = self.pending.len();
        return None;
      };
      let line = self.pending.split_to(self.scanned + offset);
      self.pending.advance(1);
      self.scanned = 0;
      if !line.is_empty() {
        return Some(Row::parse(&line));
      }
    }
  }

  /// Flush a trailing row that was not newline-terminated.
  pub fn finish(&mut self) -> Result<Option<Row>, FlightStreamError> {
    self.scanned = 0;
    if self.pending.is_empty() {
      return Ok(None);
    }
    let line = self.pending.split();
    Row::parse(&line).map(Some)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn rows(decoder: &mut RowDecoder, chunk: &[u8]) -> Vec<Row> {
    decoder.push(chunk);
    std::iter::from_fn(|| decoder.next_row()).map(Result::unwrap).collect()
  }

  #[test]
  fn splits_across_chunk_boundaries() {
    let mut decoder = RowDecoder::new();
    assert!(rows(&mut decoder, b"0:{\"b\":").is_empty());
    assert_eq!(
      rows(&mut decoder, b"\"x\"}\n1:[1,2]\n2:"),
      vec![
        Row { id: "0".into(), value: json!({"b": "x"}) },
        Row { id: "1".into(), value: json!([1, 2]) },
      ]
    );
    assert!(rows(&mut decoder, b"null").is_empty());
    assert_eq!(decoder.finish().unwrap(), Some(Row { id: "2".into(), value: Value::Null }));
    assert_eq!(decoder.finish().unwrap(), None);
  }

  #[test]
  fn long_row_in_small_chunks() {
    let body = format!("0:\"{}\"\n", "x".repeat(4096));
    let mut decoder = RowDecoder::new();
    let mut out = Vec::new();
    for chunk in body.as_bytes().chunks(7) {
      out.extend(rows(&mut decoder, chunk));
    }
    assert_eq!(out, vec![Row { id: "0".into(), value: json!("x".repeat(4096)) }]);
    assert_eq!(decoder.finish().unwrap(), None);
  }

  #[test]
  fn multibyte_split_is_reassembled() {
    let text = "0:\"é\"\n".as_bytes();
    let mut decoder = RowDecoder::new();
    assert!(rows(&mut decoder, &text[..4]).is_empty());
    assert_eq!(rows(&mut decoder, &text[4..])[0].value, json!("é"));
  }

  #[test]
  fn skips_blank_lines() {
    let mut decoder = RowDecoder::new();
    assert_eq!(rows(&mut decoder, b"\n\n0:1\n").len(), 1);
  }

  #[test]
  fn malformed_row_keeps_its_neighbours() {
    let mut decoder = RowDecoder::new();
    decoder.push(b"0:1\n{}\n:1\n1:2\n");
    assert_eq!(decoder.next_row().unwrap().unwrap().value, json!(1));
    assert!(matches!(decoder.next_row(), Some(Err(FlightStreamError::MalformedRow(_)))));
    assert!(matches!(decoder.next_row(), Some(Err(FlightStreamError::MalformedRow(_)))));
    assert_eq!(decoder.next_row().unwrap().unwrap().id, "1");
    assert!(decoder.next_row().is_none());
  }
}

/* src/client/flight/rust/src/lib.rs */

//! Inbound plumbing for streamed flight payloads.
//! The server inlines framed records into the document; `FlightIngest`
//! buffers them until a reader registers, and `RowDecoder` splits the
//! resulting byte stream into `<id>:<json>` rows.

mod errors;
mod ingest;
mod record;
mod rows;

pub use errors::FlightStreamError;
pub use ingest::{FlightIngest, FlightReader};
pub use record::FlightRecord;
pub use rows::{Row, RowDecoder};



mod base;
mod blocking;
mod sink;

pub use base::{Registry, SourceAdapter, SourceError, SourceQuery, SourceRecord};
pub use blocking::{BlockingSource, BlockingSourceAdapter};
pub use sink::{ExternalSink, HttpSink, SinkAck, SinkError, Submission};

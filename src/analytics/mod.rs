//! Click analytics pipeline
//!
//! Producer side: [`ClickPublisher`] buffers events and appends them to the
//! broker stream. Consumer side: [`ClickIngestor`] pulls, enriches and
//! batch-writes them into the analytics store with at-least-once semantics.

pub mod enrich;
mod event;
mod ingestor;
mod publisher;
pub mod sink;

pub use enrich::Enricher;
pub use event::{ClickEvent, EnrichedClickEvent};
pub use ingestor::ClickIngestor;
pub use publisher::ClickPublisher;
pub use sink::{ClickEventSink, MemoryClickSink, SeaOrmClickSink};

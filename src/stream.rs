//! Streaming ingestion pipeline
//!
//! Raw bytes go through three stages: [`FrameDecoder`] splits them into
//! records, [`StreamEvent::parse`] turns records into typed events, and
//! [`BlockAssembler`] folds events into message blocks. [`EventReader`] glues
//! the first two together for the session pump.

mod assembler;
mod event;
mod frame;

#[cfg(test)]
mod proptests;

pub use assembler::{BlockAssembler, Flow};
pub use event::StreamEvent;
pub use frame::{Boundary, Frame, FrameDecoder};

/// Item produced by [`EventReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadItem {
    Event(StreamEvent),
    /// `[DONE]` seen; nothing follows
    Done,
}

/// Decodes bytes straight into events, skipping anything unusable
#[derive(Debug, Default)]
pub struct EventReader {
    decoder: FrameDecoder,
}

impl EventReader {
    pub fn new(decoder: FrameDecoder) -> Self {
        Self { decoder }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.decoder.feed(chunk);
    }

    /// Next event available in the buffered input
    pub fn next_item(&mut self) -> Option<ReadItem> {
        self.decoder.frames().find_map(interpret)
    }

    /// Flush input left over at end of stream
    pub fn finish(&mut self) -> Option<ReadItem> {
        match self.decoder.finish().map(interpret) {
            Some(Some(item)) => Some(item),
            Some(None) => self.next_item(),
            None => None,
        }
    }
}

fn interpret(frame: Frame) -> Option<ReadItem> {
    match frame {
        Frame::Done => Some(ReadItem::Done),
        Frame::Data(payload) => match StreamEvent::parse(&payload) {
            Ok(Some(event)) => Some(ReadItem::Event(event)),
            Ok(None) => {
                tracing::debug!(payload = %payload, "Ignoring unknown stream event");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Skipping unparseable stream event");
                None
            }
        },
    }
}

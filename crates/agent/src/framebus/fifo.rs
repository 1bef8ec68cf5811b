//! Bounded frame FIFO — at most [`FIFO_CAPACITY`] unread records per
//! device, oldest dropped front-first under backpressure.

use std::collections::VecDeque;

use bytes::Bytes;

pub const FIFO_CAPACITY: usize = 10;

/// One frame record as read from the device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Stream id, `<ms>-<seq>`.
    pub id: String,
    /// Opaque decoded-frame envelope produced by the worker.
    pub payload: Bytes,
}

impl FrameRecord {
    /// Millisecond component of the stream id.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.id.split('-').next()?.parse().ok()
    }
}

#[derive(Debug, Default)]
pub struct FrameFifo {
    records: VecDeque<FrameRecord>,
}

impl FrameFifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&mut self, record: FrameRecord) {
        while self.records.len() >= FIFO_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Oldest unread record, if any.
    pub fn pop(&mut self) -> Option<FrameRecord> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id of the newest record seen, used as the next read cursor.
    pub fn newest_id(&self) -> Option<&str> {
        self.records.back().map(|r| r.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> FrameRecord {
        FrameRecord {
            id: id.to_string(),
            payload: Bytes::from_static(b"frame"),
        }
    }

    #[test]
    fn push_pop_order_is_fifo() {
        let mut fifo = FrameFifo::new();
        fifo.push(record("1-0"));
        fifo.push(record("2-0"));
        assert_eq!(fifo.pop().unwrap().id, "1-0");
        assert_eq!(fifo.pop().unwrap().id, "2-0");
        assert!(fifo.pop().is_none());
    }

    #[test]
    fn capacity_never_exceeded_oldest_dropped() {
        let mut fifo = FrameFifo::new();
        for i in 0..25 {
            fifo.push(record(&format!("{}-0", i)));
            assert!(fifo.len() <= FIFO_CAPACITY);
        }
        assert_eq!(fifo.len(), FIFO_CAPACITY);
        // 0..14 dropped, 15 is the oldest survivor.
        assert_eq!(fifo.pop().unwrap().id, "15-0");
    }

    #[test]
    fn timestamp_parsed_from_stream_id() {
        assert_eq!(record("1700000000123-7").timestamp_ms(), Some(1700000000123));
        assert_eq!(record("garbage").timestamp_ms(), None);
    }
}

//! The unit of data handed from a producing operator to its consumer.
//!
//! A `DataBuffer` carries a batch of rows plus exactly one `BufferFlag`.
//! Buffers are immutable once built and are never cloned: ownership moves
//! from producer to consumer through a connector lane.
//!
//! Control markers:
//! - `EndOfEpoch` closes one pass over the underlying data source.
//! - `EndOfStream` is the terminal buffer on a connector; nothing follows it.

use serde::{Deserialize, Serialize};

use crate::id::BufferId;
use crate::types::RowBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFlag {
    Data,
    EndOfEpoch,
    EndOfStream,
}

#[derive(Debug, PartialEq)]
pub struct DataBuffer {
    id: BufferId,
    flag: BufferFlag,
    rows: RowBatch,
}

impl DataBuffer {
    pub fn data(id: BufferId, rows: RowBatch) -> Self {
        Self {
            id,
            flag: BufferFlag::Data,
            rows,
        }
    }

    /// Control markers never carry rows.
    pub fn end_of_epoch(id: BufferId) -> Self {
        Self {
            id,
            flag: BufferFlag::EndOfEpoch,
            rows: RowBatch::empty(),
        }
    }

    pub fn end_of_stream(id: BufferId) -> Self {
        Self {
            id,
            flag: BufferFlag::EndOfStream,
            rows: RowBatch::empty(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn flag(&self) -> BufferFlag {
        self.flag
    }

    pub fn is_data(&self) -> bool {
        self.flag == BufferFlag::Data
    }

    pub fn is_eoe(&self) -> bool {
        self.flag == BufferFlag::EndOfEpoch
    }

    pub fn is_eos(&self) -> bool {
        self.flag == BufferFlag::EndOfStream
    }

    pub fn rows(&self) -> &RowBatch {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.num_rows()
    }

    /// Consume the buffer and take its payload.
    pub fn into_rows(self) -> RowBatch {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_mutually_exclusive() {
        let eoe = DataBuffer::end_of_epoch(BufferId::new(1));
        assert!(eoe.is_eoe() && !eoe.is_eos() && !eoe.is_data());

        let eos = DataBuffer::end_of_stream(BufferId::new(2));
        assert!(eos.is_eos() && !eos.is_eoe() && !eos.is_data());
        assert_eq!(eos.num_rows(), 0);
    }

    #[test]
    fn data_buffer_hands_over_rows() {
        let buf = DataBuffer::data(BufferId::new(0), RowBatch::from_i64_range("id", 0..3));
        assert_eq!(buf.flag(), BufferFlag::Data);
        assert_eq!(buf.num_rows(), 3);
        let rows = buf.into_rows();
        assert_eq!(rows.num_rows(), 3);
    }
}

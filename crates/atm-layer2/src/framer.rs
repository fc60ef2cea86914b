//! Segmentation of data units into cells and batching of cells into frames.
//!
//! A frame is always [`CELLS_PER_FRAME`] cells long. When the scheduler
//! cannot supply enough cells the frame is completed with idle cells, which
//! the receiver discards.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::cell::{Cell, CellHeader, Circuit, HeaderFormat, CELL_LEN, PAYLOAD_LEN};
use crate::cell::{PT_CONGESTION_EXPERIENCED, PT_END_OF_PDU};
use crate::scheduler::WrrScheduler;

/// Cells carried by one frame.
pub const CELLS_PER_FRAME: usize = 4;

/// Wire length of a frame.
pub const FRAME_LEN: usize = CELL_LEN * CELLS_PER_FRAME;

/// A protocol data unit handed down by the adaptation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUnit {
    pub circuit: Circuit,
    pub payload: Bytes,
    pub congestion_experienced: bool,
    /// Cell loss priority: eligible for discard first.
    pub low_priority: bool,
}

impl DataUnit {
    pub fn new(circuit: Circuit, payload: impl Into<Bytes>) -> Self {
        Self {
            circuit,
            payload: payload.into(),
            congestion_experienced: false,
            low_priority: false,
        }
    }

    /// Number of cells [`segment`] produces for this unit.
    pub fn cell_count(&self) -> usize {
        self.payload.len().div_ceil(PAYLOAD_LEN).max(1)
    }
}

/// Splits a unit into cells carrying its circuit and congestion bits. The
/// last cell is flagged end-of-PDU. An empty payload still yields one cell.
pub fn segment(unit: &DataUnit, format: HeaderFormat) -> Vec<Cell> {
    let count = unit.cell_count();
    let mut base = CellHeader::for_circuit(unit.circuit);
    base.clp = unit.low_priority;
    if unit.congestion_experienced {
        base.pt |= PT_CONGESTION_EXPERIENCED;
    }

    (0..count)
        .map(|i| {
            let start = (i * PAYLOAD_LEN).min(unit.payload.len());
            let end = ((i + 1) * PAYLOAD_LEN).min(unit.payload.len());
            let mut header = base;
            if i + 1 == count {
                header.pt |= PT_END_OF_PDU;
            }
            Cell::new(&header, format, &unit.payload[start..end])
        })
        .collect()
}

/// Whether the cell is frame filler.
pub fn is_idle_cell(cell: &Cell) -> bool {
    cell.is_idle()
}

/// A fixed batch of cells transmitted as one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    cells: Vec<Cell>,
}

impl Frame {
    /// # Panics
    ///
    /// If `cells` does not hold exactly [`CELLS_PER_FRAME`] cells.
    pub fn new(cells: Vec<Cell>) -> Self {
        assert_eq!(cells.len(), CELLS_PER_FRAME, "a frame holds exactly {CELLS_PER_FRAME} cells");
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cells that carry data rather than filler.
    pub fn data_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_idle()).count()
    }

    /// Size on the wire, always [`FRAME_LEN`].
    pub fn len_bytes(&self) -> usize {
        self.cells.iter().map(Cell::len).sum()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        for cell in &self.cells {
            buf.put_slice(cell.as_bytes());
        }
        buf.freeze()
    }

    /// Parses a received frame. Returns `None` unless `bytes` is exactly
    /// [`FRAME_LEN`] long.
    pub fn from_bytes(mut bytes: Bytes) -> Option<Self> {
        if bytes.len() != FRAME_LEN {
            return None;
        }
        let mut cells = Vec::with_capacity(CELLS_PER_FRAME);
        while !bytes.is_empty() {
            cells.push(Cell::from_bytes(bytes.split_to(CELL_LEN))?);
        }
        Some(Self { cells })
    }
}

/// Pulls up to [`CELLS_PER_FRAME`] cells from the scheduler and pads the
/// remainder with idle cells.
pub fn assemble_frame(scheduler: &mut WrrScheduler, now: Duration) -> Frame {
    let mut cells = Vec::with_capacity(CELLS_PER_FRAME);
    while cells.len() < CELLS_PER_FRAME {
        match scheduler.select_next(now) {
            Some((_, cell)) => cells.push(cell),
            None => break,
        }
    }
    let real = cells.len();
    cells.resize_with(CELLS_PER_FRAME, Cell::idle);
    tracing::trace!(real, idle = CELLS_PER_FRAME - real, "frame assembled");
    Frame { cells }
}

/// Splits a frame back into its cells, in transmission order.
pub fn disassemble(frame: Frame) -> Vec<Cell> {
    frame.cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RedQueue;
    use crate::red::RedParams;
    use crate::scheduler::CONTROL_PRIORITY;

    fn scheduler_with(cells: usize) -> WrrScheduler {
        let mut s = WrrScheduler::new(112_000);
        s.add_queue(
            RedQueue::new(0, 15_000, RedParams::default(), 0, Duration::ZERO),
            CONTROL_PRIORITY,
            0,
        );
        s.add_queue(
            RedQueue::new(1, 15_000, RedParams::default(), 1, Duration::ZERO),
            1,
            112_000,
        );
        for i in 0..cells {
            let unit = DataUnit::new(Circuit::new(1, 32 + i as u16), vec![i as u8; 48]);
            for cell in segment(&unit, HeaderFormat::Uni) {
                s.insert(1, cell, Duration::ZERO);
            }
        }
        s
    }

    #[test]
    fn segment_counts_cells() {
        let circuit = Circuit::new(1, 32);
        assert_eq!(segment(&DataUnit::new(circuit, Bytes::new()), HeaderFormat::Uni).len(), 1);
        assert_eq!(segment(&DataUnit::new(circuit, vec![0u8; 48]), HeaderFormat::Uni).len(), 1);
        assert_eq!(segment(&DataUnit::new(circuit, vec![0u8; 49]), HeaderFormat::Uni).len(), 2);
        assert_eq!(segment(&DataUnit::new(circuit, vec![0u8; 1000]), HeaderFormat::Uni).len(), 21);
    }

    #[test]
    fn segment_copies_metadata_and_flags_last_cell() {
        let mut unit = DataUnit::new(Circuit::new(7, 99), (0..100u8).collect::<Vec<_>>());
        unit.congestion_experienced = true;
        unit.low_priority = true;
        let cells = segment(&unit, HeaderFormat::Nni);
        assert_eq!(cells.len(), 3);
        for (i, cell) in cells.iter().enumerate() {
            let h = cell.header(HeaderFormat::Nni);
            assert_eq!(h.circuit(), Circuit::new(7, 99));
            assert!(h.congestion_experienced());
            assert!(h.clp);
            assert_eq!(h.end_of_pdu(), i == 2);
        }
        assert_eq!(cells[1].payload()[0], 48);
        assert_eq!(cells[2].payload()[3], 99);
        assert_eq!(cells[2].payload()[4], 0);
    }

    #[test]
    fn frame_is_always_four_cells() {
        for available in 0..=6 {
            let mut s = scheduler_with(available);
            let frame = assemble_frame(&mut s, Duration::ZERO);
            assert_eq!(frame.cells().len(), CELLS_PER_FRAME);
            let idle = frame.cells().iter().filter(|c| is_idle_cell(c)).count();
            assert_eq!(idle, CELLS_PER_FRAME - frame.data_cells());
            assert_eq!(frame.data_cells(), available.min(CELLS_PER_FRAME));
        }
    }

    #[test]
    fn disassemble_preserves_order() {
        let mut s = scheduler_with(3);
        let frame = assemble_frame(&mut s, Duration::ZERO);
        let cells = disassemble(frame.clone());
        assert_eq!(cells.as_slice(), frame.cells());
        let vcis: Vec<u16> = cells[..3]
            .iter()
            .map(|c| c.header(HeaderFormat::Uni).vci)
            .collect();
        assert_eq!(vcis, vec![32, 33, 34]);
        assert!(is_idle_cell(&cells[3]));
    }

    #[test]
    fn wire_round_trip() {
        let mut s = scheduler_with(2);
        let frame = assemble_frame(&mut s, Duration::ZERO);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(frame.len_bytes(), FRAME_LEN);
        assert_eq!(Frame::from_bytes(bytes).unwrap(), frame);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(Frame::from_bytes(Bytes::from(vec![0u8; FRAME_LEN - 1])).is_none());
        assert!(Frame::from_bytes(Bytes::from(vec![0u8; FRAME_LEN + 53])).is_none());
    }

    #[test]
    #[should_panic(expected = "exactly")]
    fn short_frame_panics() {
        Frame::new(vec![Cell::idle()]);
    }
}

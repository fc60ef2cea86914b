//! # ATM Cell Format
//!
//! Fixed 53-byte cells: a 5-byte header followed by a 48-byte payload.
//!
//! ## UNI header
//!
//! ```text
//!  0       4       8              16              24          29  31
//! +-------+-------+---------------+-------------------+-----+-+--------+
//! |  GFC  |      VPI (8)          |     VCI (16)      | PT  |C|  HEC   |
//! +-------+-------+---------------+-------------------+-----+-+--------+
//! ```
//!
//! ## NNI header
//!
//! ```text
//!  0                  12                              28  31
//! +--------------------+------------------------------+-----+-+--------+
//! |      VPI (12)      |           VCI (16)           | PT  |C|  HEC   |
//! +--------------------+------------------------------+-----+-+--------+
//! ```
//!
//! All fields are packed big-endian into the first four bytes; byte 4 is
//! the header error control (CRC-8, ITU-T I.432). PT and CLP occupy the
//! same bits in both layouts.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Total cell length in bytes.
pub const CELL_LEN: usize = 53;

/// Header length including the HEC byte.
pub const HEADER_LEN: usize = 5;

/// Payload bytes carried by one cell.
pub const PAYLOAD_LEN: usize = CELL_LEN - HEADER_LEN;

/// Value of the first four bytes of an idle cell.
pub const IDLE_MARKER: u32 = 1;

/// PT bit set when a queue signals congestion on the cell's path.
pub const PT_CONGESTION_EXPERIENCED: u8 = 0b100;

/// PT bit set on the last cell of a segmented data unit.
pub const PT_END_OF_PDU: u8 = 0b001;

const HEC_COSET: u8 = 0x55;

// ─── Header ──────────────────────────────────────────────────────────────────

/// Which header layout an interface speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderFormat {
    /// User-network interface: 4-bit GFC, 8-bit VPI.
    Uni,
    /// Network-network interface: 12-bit VPI.
    Nni,
}

impl HeaderFormat {
    /// Largest VPI representable in this layout.
    pub fn max_vpi(self) -> u16 {
        match self {
            HeaderFormat::Uni => 0xFF,
            HeaderFormat::Nni => 0xFFF,
        }
    }
}

/// A virtual circuit, identified by its path and channel numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Circuit {
    pub vpi: u16,
    pub vci: u16,
}

impl Circuit {
    /// Well-known circuit carrying signalling traffic.
    pub const SIGNALLING: Circuit = Circuit { vpi: 0, vci: 5 };

    pub const fn new(vpi: u16, vci: u16) -> Self {
        Self { vpi, vci }
    }

    pub fn is_signalling(&self) -> bool {
        *self == Self::SIGNALLING
    }
}

/// Decoded cell header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellHeader {
    /// Generic flow control, UNI only. Always written as zero on NNI.
    pub gfc: u8,
    pub vpi: u16,
    pub vci: u16,
    /// Payload type, 3 bits.
    pub pt: u8,
    /// Cell loss priority.
    pub clp: bool,
}

impl CellHeader {
    pub fn for_circuit(circuit: Circuit) -> Self {
        Self {
            vpi: circuit.vpi,
            vci: circuit.vci,
            ..Default::default()
        }
    }

    pub fn circuit(&self) -> Circuit {
        Circuit::new(self.vpi, self.vci)
    }

    pub fn congestion_experienced(&self) -> bool {
        self.pt & PT_CONGESTION_EXPERIENCED != 0
    }

    pub fn end_of_pdu(&self) -> bool {
        self.pt & PT_END_OF_PDU != 0
    }

    /// Packs the header into its 4-byte word. Out-of-range fields are
    /// truncated to their bit width.
    pub fn pack(&self, format: HeaderFormat) -> u32 {
        let tail = (u32::from(self.vci) << 4) | (u32::from(self.pt & 0x7) << 1) | u32::from(self.clp);
        match format {
            HeaderFormat::Uni => {
                (u32::from(self.gfc & 0xF) << 28) | (u32::from(self.vpi & 0xFF) << 20) | tail
            }
            HeaderFormat::Nni => (u32::from(self.vpi & 0xFFF) << 20) | tail,
        }
    }

    /// Inverse of [`CellHeader::pack`].
    pub fn unpack(word: u32, format: HeaderFormat) -> Self {
        let (gfc, vpi) = match format {
            HeaderFormat::Uni => (((word >> 28) & 0xF) as u8, ((word >> 20) & 0xFF) as u16),
            HeaderFormat::Nni => (0, ((word >> 20) & 0xFFF) as u16),
        };
        Self {
            gfc,
            vpi,
            vci: ((word >> 4) & 0xFFFF) as u16,
            pt: ((word >> 1) & 0x7) as u8,
            clp: word & 0x1 != 0,
        }
    }

    /// Encodes the header as five wire bytes, HEC included.
    pub fn encode(&self, format: HeaderFormat) -> [u8; HEADER_LEN] {
        let word = self.pack(format).to_be_bytes();
        [word[0], word[1], word[2], word[3], hec(&word)]
    }

    /// Decodes the first five bytes of `buf`. Returns `None` when the
    /// buffer is shorter than a header. The HEC byte is not checked; see
    /// [`hec_matches`].
    pub fn decode(buf: &[u8], format: HeaderFormat) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Some(Self::unpack(word, format))
    }
}

/// CRC-8 (x^8 + x^2 + x + 1) over the four header bytes, XOR the I.432 coset.
pub fn hec(header: &[u8; 4]) -> u8 {
    let mut crc = 0u8;
    for byte in header {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc ^ HEC_COSET
}

/// Whether the HEC byte of a 5-byte header matches its first four bytes.
pub fn hec_matches(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN && hec(&[buf[0], buf[1], buf[2], buf[3]]) == buf[4]
}

// ─── Cell ────────────────────────────────────────────────────────────────────

/// One 53-byte cell. Cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell(Bytes);

impl Cell {
    /// Builds a data cell. `payload` longer than [`PAYLOAD_LEN`] is
    /// truncated; shorter payloads are zero-padded.
    pub fn new(header: &CellHeader, format: HeaderFormat, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(CELL_LEN);
        buf.put_slice(&header.encode(format));
        let take = payload.len().min(PAYLOAD_LEN);
        buf.put_slice(&payload[..take]);
        buf.put_bytes(0, PAYLOAD_LEN - take);
        Cell(buf.freeze())
    }

    /// The filler cell used to complete a frame.
    pub fn idle() -> Self {
        let mut buf = BytesMut::with_capacity(CELL_LEN);
        buf.put_u32(IDLE_MARKER);
        buf.put_bytes(0, CELL_LEN - 4);
        Cell(buf.freeze())
    }

    /// Wraps raw wire bytes. Returns `None` unless exactly [`CELL_LEN`] long.
    pub fn from_bytes(bytes: Bytes) -> Option<Self> {
        (bytes.len() == CELL_LEN).then_some(Cell(bytes))
    }

    pub fn is_idle(&self) -> bool {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]) == IDLE_MARKER
    }

    pub fn header(&self, format: HeaderFormat) -> CellHeader {
        let word = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        CellHeader::unpack(word, format)
    }

    /// Replaces the header, keeping the payload.
    pub fn set_header(&mut self, header: &CellHeader, format: HeaderFormat) {
        let mut buf = BytesMut::with_capacity(CELL_LEN);
        buf.put_slice(&header.encode(format));
        buf.put_slice(&self.0[HEADER_LEN..]);
        self.0 = buf.freeze();
    }

    /// Sets the congestion-experienced PT bit and refreshes the HEC.
    pub fn mark_congestion(&mut self) {
        let mut buf = BytesMut::from(&self.0[..]);
        buf[3] |= PT_CONGESTION_EXPERIENCED << 1;
        buf[4] = hec(&[buf[0], buf[1], buf[2], buf[3]]);
        self.0 = buf.freeze();
    }

    pub fn congestion_experienced(&self) -> bool {
        (self.0[3] >> 1) & PT_CONGESTION_EXPERIENCED != 0
    }

    pub fn payload(&self) -> Bytes {
        self.0.slice(HEADER_LEN..)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Size in bytes, always [`CELL_LEN`].
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_idle() {
            return f.write_str("Cell(idle)");
        }
        write!(f, "Cell({:02x?})", &self.0[..HEADER_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uni_header_bit_layout() {
        let header = CellHeader {
            gfc: 0,
            vpi: 0xAB,
            vci: 0x1234,
            pt: 0b101,
            clp: true,
        };
        // GFC=0000 VPI=10101011 VCI=0001001000110100 PT=101 CLP=1
        assert_eq!(header.pack(HeaderFormat::Uni), 0x0AB1_234B);
        let bytes = header.encode(HeaderFormat::Uni);
        assert_eq!(&bytes[..4], &[0x0A, 0xB1, 0x23, 0x4B]);
    }

    #[test]
    fn nni_header_uses_twelve_bit_vpi() {
        let header = CellHeader {
            gfc: 0,
            vpi: 0xFED,
            vci: 0x0001,
            pt: 0,
            clp: false,
        };
        assert_eq!(header.pack(HeaderFormat::Nni), 0xFED0_0010);
        let decoded = CellHeader::unpack(0xFED0_0010, HeaderFormat::Nni);
        assert_eq!(decoded, header);
    }

    #[test]
    fn uni_truncates_wide_vpi() {
        let header = CellHeader {
            vpi: 0x1FF,
            ..Default::default()
        };
        let decoded = CellHeader::unpack(header.pack(HeaderFormat::Uni), HeaderFormat::Uni);
        assert_eq!(decoded.vpi, 0xFF);
    }

    #[test]
    fn uni_keeps_gfc_nni_does_not() {
        let header = CellHeader {
            gfc: 0xF,
            vpi: 1,
            vci: 2,
            ..Default::default()
        };
        let uni = CellHeader::unpack(header.pack(HeaderFormat::Uni), HeaderFormat::Uni);
        assert_eq!(uni.gfc, 0xF);
        let nni = CellHeader::unpack(header.pack(HeaderFormat::Nni), HeaderFormat::Nni);
        assert_eq!(nni.gfc, 0);
    }

    #[test]
    fn hec_known_vector() {
        // An all-zero header has CRC 0, so the HEC is the coset itself.
        assert_eq!(hec(&[0, 0, 0, 0]), 0x55);
        let bytes = CellHeader::for_circuit(Circuit::new(1, 32)).encode(HeaderFormat::Uni);
        assert!(hec_matches(&bytes));
    }

    #[test]
    fn idle_cell_layout() {
        let idle = Cell::idle();
        assert_eq!(idle.len(), CELL_LEN);
        assert_eq!(&idle.as_bytes()[..4], &[0, 0, 0, 1]);
        assert!(idle.as_bytes()[4..].iter().all(|&b| b == 0));
        assert!(idle.is_idle());
    }

    #[test]
    fn data_cell_is_not_idle() {
        let cell = Cell::new(
            &CellHeader::for_circuit(Circuit::new(0, 32)),
            HeaderFormat::Uni,
            b"hello",
        );
        assert!(!cell.is_idle());
        assert_eq!(cell.len(), CELL_LEN);
        assert_eq!(&cell.payload()[..5], b"hello");
        assert!(cell.payload()[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mark_congestion_sets_pt_bit_and_refreshes_hec() {
        let mut cell = Cell::new(
            &CellHeader::for_circuit(Circuit::new(3, 77)),
            HeaderFormat::Nni,
            &[0xAA; PAYLOAD_LEN],
        );
        assert!(!cell.congestion_experienced());
        cell.mark_congestion();
        assert!(cell.congestion_experienced());
        let header = cell.header(HeaderFormat::Nni);
        assert!(header.congestion_experienced());
        assert_eq!(header.circuit(), Circuit::new(3, 77));
        assert!(hec_matches(cell.as_bytes()));
        assert_eq!(cell.payload(), Bytes::from(vec![0xAA; PAYLOAD_LEN]));
    }

    #[test]
    fn set_header_rewrites_circuit_only() {
        let mut cell = Cell::new(
            &CellHeader {
                vpi: 1,
                vci: 40,
                pt: PT_END_OF_PDU,
                clp: true,
                gfc: 0,
            },
            HeaderFormat::Uni,
            b"payload",
        );
        let mut header = cell.header(HeaderFormat::Uni);
        header.vpi = 0x200;
        header.vci = 41;
        cell.set_header(&header, HeaderFormat::Nni);

        let rewritten = cell.header(HeaderFormat::Nni);
        assert_eq!(rewritten.circuit(), Circuit::new(0x200, 41));
        assert!(rewritten.end_of_pdu());
        assert!(rewritten.clp);
        assert_eq!(&cell.payload()[..7], b"payload");
    }

    #[test]
    fn from_bytes_requires_exact_length() {
        assert!(Cell::from_bytes(Bytes::from(vec![0u8; 52])).is_none());
        assert!(Cell::from_bytes(Bytes::from(vec![0u8; 54])).is_none());
        assert!(Cell::from_bytes(Bytes::from(vec![0u8; 53])).is_some());
    }

    #[test]
    fn decode_short_buffer_fails() {
        assert!(CellHeader::decode(&[0, 0, 0, 0], HeaderFormat::Uni).is_none());
        assert!(CellHeader::decode(&[0, 0, 0, 0x50, 0], HeaderFormat::Uni).is_some());
    }

    #[test]
    fn signalling_circuit() {
        assert!(Circuit::new(0, 5).is_signalling());
        assert!(!Circuit::new(0, 6).is_signalling());
        assert!(!Circuit::new(1, 5).is_signalling());
    }
}

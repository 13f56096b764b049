//! The gzip-compatible chunk framing.
//!
//! Every accelerator chunk is wrapped in a standard gzip member whose
//! FEXTRA subfield carries the chunk's compressed and original lengths,
//! so the drain side of a decompress call can size each hardware request
//! without inflating anything. Streams produced by ordinary gzip tools
//! lack the subfield and are routed to the software decoder instead.
//!
//! Layout (little-endian):
//!
//! ```text
//! header (24 B): 1f 8b 08 04 | mtime=0 | xfl=block_log2 | os |
//!                xlen=12 | 'Q' 'Z' | sublen=8 | compressed_len u32 | original_len u32
//! body:          compressed_len bytes of raw DEFLATE
//! footer (8 B):  crc32 u32 | isize u32
//! ```

/// Total size of the framed chunk header.
pub const HEADER_SZ: usize = 24;
/// Total size of the framed chunk footer.
pub const FOOTER_SZ: usize = 8;

const ID1: u8 = 0x1f;
const ID2: u8 = 0x8b;
const CM_DEFLATE: u8 = 8;
const OS_UNIX: u8 = 3;
const XLEN: u16 = 12;
const SUBFIELD_LEN: u16 = 8;
const SUBFIELD_MAGIC: [u8; 2] = *b"QZ";

const FLG_FHCRC: u8 = 0x02;
const FLG_FEXTRA: u8 = 0x04;
const FLG_FNAME: u8 = 0x08;
const FLG_FCOMMENT: u8 = 0x10;

/// Chunk metadata carried in the frame header's extra subfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// log2 of the producer's hardware buffer size.
    pub block_log2: u8,
    /// Size of the DEFLATE body that follows the header.
    pub compressed_len: u32,
    /// Size of the original data this chunk decodes to.
    pub original_len: u32,
}

/// What a gzip member header turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// One of ours: a framed accelerator chunk.
    Framed(FrameHeader),
    /// A standard gzip member (no subfield, or somebody else's subfield).
    Standard,
}

/// Why a header failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer bytes than the structure requires.
    Truncated,
    /// Not a gzip stream at all.
    NotGzip,
    /// FEXTRA is set but the extra region contradicts itself.
    BadExtra,
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Write a framed chunk header into `out[..HEADER_SZ]`.
pub fn write_frame_header(out: &mut [u8], compressed_len: u32, original_len: u32, block_log2: u8) {
    out[0] = ID1;
    out[1] = ID2;
    out[2] = CM_DEFLATE;
    out[3] = FLG_FEXTRA;
    out[4..8].fill(0); // mtime
    out[8] = block_log2;
    out[9] = OS_UNIX;
    out[10..12].copy_from_slice(&XLEN.to_le_bytes());
    out[12..14].copy_from_slice(&SUBFIELD_MAGIC);
    out[14..16].copy_from_slice(&SUBFIELD_LEN.to_le_bytes());
    out[16..20].copy_from_slice(&compressed_len.to_le_bytes());
    out[20..24].copy_from_slice(&original_len.to_le_bytes());
}

/// Write a chunk footer into `out[..FOOTER_SZ]`.
pub fn write_footer(out: &mut [u8], crc32: u32, isize_: u32) {
    out[0..4].copy_from_slice(&crc32.to_le_bytes());
    out[4..8].copy_from_slice(&isize_.to_le_bytes());
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a member header, distinguishing framed chunks from standard gzip.
pub fn parse_header(src: &[u8]) -> Result<Header, HeaderError> {
    if src.len() >= 2 && (src[0] != ID1 || src[1] != ID2) {
        return Err(HeaderError::NotGzip);
    }
    if src.len() < 10 {
        return Err(HeaderError::Truncated);
    }
    if src[2] != CM_DEFLATE {
        return Err(HeaderError::NotGzip);
    }

    let flg = src[3];
    if flg & FLG_FEXTRA == 0 {
        return Ok(Header::Standard);
    }

    if src.len() < 16 {
        return Err(HeaderError::Truncated);
    }
    if src[12..14] != SUBFIELD_MAGIC {
        // Somebody else's extra subfield: a legitimate standard stream.
        return Ok(Header::Standard);
    }

    let xlen = u16::from_le_bytes([src[10], src[11]]);
    let sublen = u16::from_le_bytes([src[14], src[15]]);
    if xlen != XLEN || sublen != SUBFIELD_LEN {
        return Err(HeaderError::BadExtra);
    }
    if src.len() < HEADER_SZ {
        return Err(HeaderError::Truncated);
    }

    Ok(Header::Framed(FrameHeader {
        block_log2: src[8],
        compressed_len: u32::from_le_bytes([src[16], src[17], src[18], src[19]]),
        original_len: u32::from_le_bytes([src[20], src[21], src[22], src[23]]),
    }))
}

/// Parse a chunk footer. Returns `(crc32, isize)`.
pub fn parse_footer(src: &[u8]) -> Option<(u32, u32)> {
    if src.len() < FOOTER_SZ {
        return None;
    }
    let crc = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    let isize_ = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
    Some((crc, isize_))
}

/// Whether `src` starts with a gzip member that is *not* a framed chunk.
pub fn is_standard_gzip(src: &[u8]) -> bool {
    matches!(parse_header(src), Ok(Header::Standard))
}

/// Full length of a standard gzip member header, optional fields included.
///
/// `None` if the header is truncated.
pub(crate) fn standard_header_len(src: &[u8]) -> Option<usize> {
    if src.len() < 10 {
        return None;
    }
    let flg = src[3];
    let mut at = 10usize;

    if flg & FLG_FEXTRA != 0 {
        if src.len() < at + 2 {
            return None;
        }
        let xlen = u16::from_le_bytes([src[at], src[at + 1]]) as usize;
        at += 2 + xlen;
    }
    if flg & FLG_FNAME != 0 {
        at = skip_nul_terminated(src, at)?;
    }
    if flg & FLG_FCOMMENT != 0 {
        at = skip_nul_terminated(src, at)?;
    }
    if flg & FLG_FHCRC != 0 {
        at += 2;
    }

    (at <= src.len()).then_some(at)
}

fn skip_nul_terminated(src: &[u8], from: usize) -> Option<usize> {
    src.get(from..)?
        .iter()
        .position(|&b| b == 0)
        .map(|p| from + p + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(compressed: u32, original: u32) -> [u8; HEADER_SZ] {
        let mut h = [0u8; HEADER_SZ];
        write_frame_header(&mut h, compressed, original, 16);
        h
    }

    // -----------------------------------------------------------------------
    // Round trip
    // -----------------------------------------------------------------------

    #[test]
    fn test_header_round_trip() {
        let h = framed(12345, 65536);
        match parse_header(&h) {
            Ok(Header::Framed(f)) => {
                assert_eq!(f.compressed_len, 12345);
                assert_eq!(f.original_len, 65536);
                assert_eq!(f.block_log2, 16);
            }
            other => panic!("expected framed header, got {other:?}"),
        }
    }

    #[test]
    fn test_footer_round_trip() {
        let mut f = [0u8; FOOTER_SZ];
        write_footer(&mut f, 0xdead_beef, 4096);
        assert_eq!(parse_footer(&f), Some((0xdead_beef, 4096)));
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn test_standard_gzip_without_extra() {
        // Plain `gzip` output: FLG carries FNAME only.
        let h = [0x1f, 0x8b, 8, 0x08, 0, 0, 0, 0, 0, 3, b'a', 0];
        assert_eq!(parse_header(&h), Ok(Header::Standard));
        assert!(is_standard_gzip(&h));
    }

    #[test]
    fn test_foreign_extra_subfield_is_standard() {
        let mut h = framed(1, 1);
        h[12] = b'A';
        h[13] = b'B';
        assert_eq!(parse_header(&h), Ok(Header::Standard));
    }

    #[test]
    fn test_inconsistent_extra_is_error() {
        let mut h = framed(1, 1);
        h[14] = 99; // subfield length contradicts the layout
        assert_eq!(parse_header(&h), Err(HeaderError::BadExtra));
    }

    #[test]
    fn test_not_gzip() {
        assert_eq!(parse_header(b"PK\x03\x04........"), Err(HeaderError::NotGzip));
    }

    #[test]
    fn test_truncated() {
        let h = framed(1, 1);
        assert_eq!(parse_header(&h[..8]), Err(HeaderError::Truncated));
        assert_eq!(parse_header(&h[..20]), Err(HeaderError::Truncated));
        assert_eq!(parse_footer(&[0u8; 4]), None);
    }

    // -----------------------------------------------------------------------
    // Standard header length
    // -----------------------------------------------------------------------

    #[test]
    fn test_standard_header_len_bare() {
        let h = [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3];
        assert_eq!(standard_header_len(&h), Some(10));
    }

    #[test]
    fn test_standard_header_len_with_name() {
        let h = [0x1f, 0x8b, 8, 0x08, 0, 0, 0, 0, 0, 3, b'f', b'o', b'o', 0];
        assert_eq!(standard_header_len(&h), Some(14));
    }

    #[test]
    fn test_standard_header_len_truncated_name() {
        let h = [0x1f, 0x8b, 8, 0x08, 0, 0, 0, 0, 0, 3, b'f'];
        assert_eq!(standard_header_len(&h), None);
    }

    #[test]
    fn test_framed_header_len_via_standard_parser() {
        // Our own frame is a valid standard header too: 10 + 2 + 12.
        let h = framed(7, 7);
        assert_eq!(standard_header_len(&h), Some(HEADER_SZ));
    }
}

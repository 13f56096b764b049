//! The software codec: the pure-CPU path behind every fallback decision.
//!
//! Output is byte-compatible with the hardware path — the same framed
//! chunks, the same footers — so a stream can be produced by either side
//! and consumed by either side. Decompression additionally accepts
//! standard gzip members (from ordinary gzip tools) interleaved with
//! framed ones.
//!
//! Only the orchestrator routes calls here; the pipeline loops never
//! invoke the software codec directly.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::checksum::{crc32, crc32_combine};
use crate::gzip::{self, Header};
use crate::session::Session;
use crate::status::Status;

// ---------------------------------------------------------------------------
// Inflater
// ---------------------------------------------------------------------------

/// Reusable raw-DEFLATE decoder state, created lazily and owned by the
/// session across calls.
pub(crate) struct Inflater {
    strm: Decompress,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            strm: Decompress::new(false),
        }
    }

    /// Inflate one raw-DEFLATE stream from `src` into `dest`.
    ///
    /// Returns `(consumed, produced)` on stream end. `BufError` when
    /// `dest` fills first, `DataError` when `src` ends (or stalls) before
    /// the stream does.
    fn inflate(&mut self, src: &[u8], dest: &mut [u8]) -> Result<(usize, usize), Status> {
        self.strm.reset(false);
        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            let res = self
                .strm
                .decompress(&src[consumed..], &mut dest[produced..], FlushDecompress::Finish);
            let next_consumed = self.strm.total_in() as usize;
            let next_produced = self.strm.total_out() as usize;
            let progressed = next_consumed > consumed || next_produced > produced;
            consumed = next_consumed;
            produced = next_produced;

            match res {
                Ok(flate2::Status::StreamEnd) => return Ok((consumed, produced)),
                Ok(_) => {
                    if produced == dest.len() {
                        return Err(Status::BufError);
                    }
                    if consumed == src.len() || !progressed {
                        return Err(Status::DataError);
                    }
                }
                Err(_) => return Err(Status::DataError),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Raw-DEFLATE one chunk.
fn deflate_chunk(data: &[u8], level: u32) -> Result<Vec<u8>, Status> {
    let mut strm = Compress::new(Compression::new(level), false);
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    loop {
        let consumed = strm.total_in() as usize;
        if out.capacity() == out.len() {
            out.reserve(data.len() / 2 + 64);
        }
        match strm.compress_vec(&data[consumed..], &mut out, FlushCompress::Finish) {
            Ok(flate2::Status::StreamEnd) => return Ok(out),
            Ok(_) => continue,
            Err(e) => {
                log::error!("software deflate failed: {e}");
                return Err(Status::Fail);
            }
        }
    }
}

/// Software compression: chunk at `hw_buff_sz`, frame each chunk.
///
/// `_last` is accepted for API symmetry; stateless chunks always flush to
/// a final block.
pub(crate) fn sw_compress(
    sess: &mut Session,
    src: &[u8],
    dest: &mut [u8],
    _last: bool,
    mut crc_out: Option<&mut u32>,
) -> crate::session::Outcome {
    let block = sess.params.hw_buff_sz as usize;
    let block_log2 = sess.params.block_log2();
    let level = sess.params.comp_lvl;

    let mut status = Status::Ok;
    let mut in_total = 0usize;
    let mut out_total = 0usize;
    let mut running: Option<u32> = None;

    for chunk in src.chunks(block) {
        let body = match deflate_chunk(chunk, level) {
            Ok(body) => body,
            Err(rc) => {
                status = rc;
                break;
            }
        };

        let need = gzip::HEADER_SZ + body.len() + gzip::FOOTER_SZ;
        if dest.len() - out_total < need {
            status = Status::BufError;
            break;
        }

        let chunk_crc = crc32(chunk);
        let at = out_total;
        gzip::write_frame_header(
            &mut dest[at..],
            body.len() as u32,
            chunk.len() as u32,
            block_log2,
        );
        dest[at + gzip::HEADER_SZ..at + gzip::HEADER_SZ + body.len()].copy_from_slice(&body);
        gzip::write_footer(
            &mut dest[at + gzip::HEADER_SZ + body.len()..],
            chunk_crc,
            chunk.len() as u32,
        );

        running = Some(match running {
            None => chunk_crc,
            Some(acc) => crc32_combine(acc, chunk_crc, chunk.len() as u64),
        });
        in_total += chunk.len();
        out_total += need;
    }

    if let Some(crc) = crc_out.as_deref_mut() {
        *crc = running.unwrap_or(0);
    }
    sess.record_totals(in_total as u64, out_total as u64);
    crate::session::Outcome {
        status,
        consumed: in_total,
        produced: out_total,
    }
}

// ---------------------------------------------------------------------------
// Decompression
// ---------------------------------------------------------------------------

/// Decode a concatenation of framed and/or standard gzip members.
///
/// Returns `(consumed, produced, status)`; on error the counts cover the
/// members decoded before the failure.
pub(crate) fn decompress_members(
    inflater: &mut Option<Inflater>,
    src: &[u8],
    dest: &mut [u8],
) -> (usize, usize, Status) {
    let strm = inflater.get_or_insert_with(Inflater::new);

    let mut at = 0usize;
    let mut out = 0usize;
    let mut status = Status::Ok;

    while at < src.len() {
        let (body_at, body_len) = match gzip::parse_header(&src[at..]) {
            Ok(Header::Framed(h)) => (at + gzip::HEADER_SZ, Some(h.compressed_len as usize)),
            Ok(Header::Standard) => match gzip::standard_header_len(&src[at..]) {
                // Body length unknown; the decoder finds the member end.
                Some(hlen) => (at + hlen, None),
                None => {
                    status = Status::DataError;
                    break;
                }
            },
            Err(_) => {
                status = Status::DataError;
                break;
            }
        };

        let body_budget = match body_len {
            Some(len) if body_at + len + gzip::FOOTER_SZ > src.len() => {
                status = Status::DataError;
                break;
            }
            Some(len) => &src[body_at..body_at + len],
            None => &src[body_at..],
        };

        let (consumed, produced) = match strm.inflate(body_budget, &mut dest[out..]) {
            Ok(pair) => pair,
            Err(rc) => {
                status = rc;
                break;
            }
        };
        if let Some(len) = body_len {
            if consumed != len {
                status = Status::DataError;
                break;
            }
        }

        let footer_at = body_at + consumed;
        let Some((crc, isize_)) = gzip::parse_footer(&src[footer_at..]) else {
            status = Status::DataError;
            break;
        };
        if isize_ as usize != produced || crc != crc32(&dest[out..out + produced]) {
            log::debug!("footer mismatch in software decode at offset {at}");
            status = Status::DataError;
            break;
        }

        at = footer_at + gzip::FOOTER_SZ;
        out += produced;
    }

    (at, out, status)
}

/// Software decompression over the whole input.
pub(crate) fn sw_decompress(
    sess: &mut Session,
    src: &[u8],
    dest: &mut [u8],
) -> crate::session::Outcome {
    let (consumed, produced, status) = decompress_members(&mut sess.inflater, src, dest);
    sess.record_totals(consumed as u64, produced as u64);
    crate::session::Outcome {
        status,
        consumed,
        produced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn compress_all(src: &[u8]) -> Vec<u8> {
        let mut sess = Session::new();
        let mut dest = vec![0u8; crate::max_compressed_length(src.len()).max(64)];
        let out = sw_compress(&mut sess, src, &mut dest, true, None);
        assert_eq!(out.status, Status::Ok);
        assert_eq!(out.consumed, src.len());
        dest.truncate(out.produced);
        dest
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn test_round_trip_small() {
        let data = b"hello quartzip".to_vec();
        let framed = compress_all(&data);
        let mut back = vec![0u8; data.len()];
        let (consumed, produced, status) = decompress_members(&mut None, &framed, &mut back);
        assert_eq!(status, Status::Ok);
        assert_eq!(consumed, framed.len());
        assert_eq!(produced, data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        // Crosses several 64 KiB chunk boundaries.
        let data: Vec<u8> = (0u32..200_000).map(|i| (i % 253) as u8).collect();
        let framed = compress_all(&data);
        let mut back = vec![0u8; data.len()];
        let (_, produced, status) = decompress_members(&mut None, &framed, &mut back);
        assert_eq!(status, Status::Ok);
        assert_eq!(produced, data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn test_chunk_headers_carry_original_len() {
        let data = vec![7u8; 70_000]; // one full chunk + remainder
        let framed = compress_all(&data);
        match gzip::parse_header(&framed).unwrap() {
            Header::Framed(h) => assert_eq!(h.original_len, 65536),
            other => panic!("unexpected header {other:?}"),
        }
    }

    #[test]
    fn test_crc_sink_matches_whole_input() {
        let data: Vec<u8> = (0u32..100_000).map(|i| (i * 7 % 251) as u8).collect();
        let mut sess = Session::new();
        let mut dest = vec![0u8; crate::max_compressed_length(data.len())];
        let mut crc = 0u32;
        let out = sw_compress(&mut sess, &data, &mut dest, true, Some(&mut crc));
        assert_eq!(out.status, Status::Ok);
        assert_eq!(crc, crc32(&data));
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[test]
    fn test_undersized_dest_is_buf_error() {
        let data = vec![1u8; 4096];
        let mut sess = Session::new();
        let mut dest = vec![0u8; 16];
        let out = sw_compress(&mut sess, &data, &mut dest, true, None);
        assert_eq!(out.status, Status::BufError);
        assert_eq!(out.produced, 0);
    }

    #[test]
    fn test_corrupt_footer_is_data_error() {
        let data = b"a stream worth protecting".to_vec();
        let mut framed = compress_all(&data);
        let crc_at = framed.len() - gzip::FOOTER_SZ;
        framed[crc_at] ^= 0x01;
        let mut back = vec![0u8; data.len()];
        let (_, _, status) = decompress_members(&mut None, &framed, &mut back);
        assert_eq!(status, Status::DataError);
    }

    #[test]
    fn test_truncated_body_is_data_error() {
        let framed = compress_all(b"some payload");
        let mut back = vec![0u8; 64];
        let (_, _, status) = decompress_members(&mut None, &framed[..framed.len() - 4], &mut back);
        assert_eq!(status, Status::DataError);
    }

    #[test]
    fn test_garbage_input_is_data_error() {
        let mut back = vec![0u8; 64];
        let (consumed, _, status) = decompress_members(&mut None, b"not gzip at all", &mut back);
        assert_eq!(status, Status::DataError);
        assert_eq!(consumed, 0);
    }

    // -----------------------------------------------------------------------
    // Standard gzip members
    // -----------------------------------------------------------------------

    fn standard_gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_standard_gzip_member_decodes() {
        let data = b"produced by a reference gzip".to_vec();
        let stream = standard_gzip(&data);
        assert!(gzip::is_standard_gzip(&stream));
        let mut back = vec![0u8; data.len()];
        let (consumed, produced, status) = decompress_members(&mut None, &stream, &mut back);
        assert_eq!(status, Status::Ok);
        assert_eq!(consumed, stream.len());
        assert_eq!(&back[..produced], &data[..]);
    }

    #[test]
    fn test_mixed_framed_and_standard_members() {
        let a = b"framed first".to_vec();
        let b = b"then standard".to_vec();
        let mut stream = compress_all(&a);
        stream.extend_from_slice(&standard_gzip(&b));

        let mut back = vec![0u8; a.len() + b.len()];
        let (consumed, produced, status) = decompress_members(&mut None, &stream, &mut back);
        assert_eq!(status, Status::Ok);
        assert_eq!(consumed, stream.len());
        assert_eq!(produced, a.len() + b.len());
        assert_eq!(&back[..a.len()], &a[..]);
        assert_eq!(&back[a.len()..], &b[..]);
    }
}

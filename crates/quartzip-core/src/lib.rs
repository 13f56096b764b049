//! # quartzip-core
//!
//! Stream DEFLATE through a hardware compression accelerator.
//!
//! The accelerator exposes a fixed pool of asynchronous instances, each
//! with DMA-pinned buffer rings. Calls chunk their input into hardware
//! requests, pair a submit loop with a poll/drain loop over the ring, and
//! emit gzip-framed chunks that carry their own sizes — so decompression
//! can size every hardware request straight from the headers. When the
//! accelerator is missing, busy, or not worth the trip (small inputs,
//! level 9), calls transparently run on the bundled software codec and
//! produce byte-identical framing.
//!
//! ## Quick start
//!
//! ```
//! use quartzip_core::Session;
//!
//! let data = b"quartzip round trip";
//! let mut sess = Session::new();
//!
//! let mut framed = vec![0u8; quartzip_core::max_compressed_length(data.len())];
//! let out = sess.compress(data, &mut framed, true);
//! assert!(out.status.is_ok());
//!
//! let mut back = vec![0u8; data.len()];
//! let rt = sess.decompress(&framed[..out.produced], &mut back);
//! assert!(rt.status.is_ok());
//! assert_eq!(&back[..rt.produced], data);
//! ```
//!
//! ## Architecture
//!
//! Orchestrator → pool (process-wide, NUMA-shuffled instances) → per-call
//! submit/drain loop pair over a slot ring → framed output.
//!
//! The device binding is injected through [`accel::AccelDriver`] and
//! installed once per process with [`install_driver`]; without one, every
//! call takes the software path.

pub mod accel;
pub mod dma;
pub mod gzip;
pub mod params;

mod call;
mod checksum;
mod compress;
mod decompress;
mod pool;
mod session;
mod slot;
mod status;
mod sw;

pub use accel::{AccelDriver, install_driver};
pub use checksum::{crc32, crc32_combine};
pub use dma::PinnedBuffer;
pub use params::{SessionParams, get_defaults, set_defaults};
pub use pool::{InstanceReport, PoolReport, close, init, report};
pub use session::{Outcome, Session};
pub use status::Status;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Worst-case framed output size for `src_sz` input bytes.
///
/// Counts one frame per hardware block (at the default block size) plus a
/// partial-block term, each at the 9/8 DEFLATE expansion bound plus skid
/// pad and framing. Monotone in `src_sz`.
pub fn max_compressed_length(src_sz: usize) -> usize {
    let framing = gzip::HEADER_SZ + gzip::FOOTER_SZ;
    let block = params::HW_BUFF_SZ_DEFAULT as usize;

    let chunk_cnt = src_sz / block;
    let max_chunk_sz = (9 * block).div_ceil(8) + params::SKID_PAD_SZ + framing;
    let mut dest_sz = max_chunk_sz * chunk_cnt;

    let last_chunk = src_sz % block;
    if last_chunk > 0 {
        dest_sz += (9 * last_chunk).div_ceil(8) + params::SKID_PAD_SZ + framing;
    }
    dest_sz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_compressed_length_zero() {
        assert_eq!(max_compressed_length(0), 0);
    }

    #[test]
    fn test_max_compressed_length_positive_and_covers_framing() {
        let n = max_compressed_length(1);
        assert!(n > gzip::HEADER_SZ + gzip::FOOTER_SZ);
    }

    #[test]
    fn test_max_compressed_length_monotone() {
        let mut prev = 0;
        for sz in [1, 100, 1024, 65_535, 65_536, 65_537, 1 << 20, (1 << 20) + 1] {
            let n = max_compressed_length(sz);
            assert!(n >= prev, "not monotone at {sz}");
            prev = n;
        }
    }

    #[test]
    fn test_max_compressed_length_bounds_expansion() {
        // Every size must cover the 9/8 bound on incompressible data.
        for sz in [1usize, 4096, 100_000, 1 << 20] {
            assert!(max_compressed_length(sz) >= (9 * sz).div_ceil(8));
        }
    }
}

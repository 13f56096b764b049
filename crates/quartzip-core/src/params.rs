//! Session parameters, their valid ranges, and the process-wide defaults.

use std::sync::{LazyLock, Mutex};

use serde::Serialize;

use crate::status::Status;

// ---------------------------------------------------------------------------
// Limits and defaults
// ---------------------------------------------------------------------------

/// Default hardware buffer (chunk) size.
pub const HW_BUFF_SZ_DEFAULT: u32 = 64 * 1024;
/// Smallest accepted hardware buffer size.
pub const HW_BUFF_SZ_MIN: u32 = 1024;
/// Largest accepted hardware buffer size.
pub const HW_BUFF_SZ_MAX: u32 = 512 * 1024;

/// Inputs below this many bytes skip the accelerator entirely.
pub const INPUT_SZ_THRESHOLD_DEFAULT: u32 = 1024;
/// Smallest accepted offload threshold.
pub const INPUT_SZ_THRESHOLD_MIN: u32 = 128;

/// Request-count boundary above which submit and drain run on separate threads.
pub const REQ_CNT_THRESHOLD_DEFAULT: u32 = 4;
/// Smallest accepted request-count threshold.
pub const REQ_CNT_THRESHOLD_MIN: u32 = 1;
/// Largest accepted request-count threshold (the ring depth).
pub const REQ_CNT_THRESHOLD_MAX: u32 = RING_DEPTH as u32;

/// Default sleep between completion-poll rounds and after RETRY, in µs.
pub const POLL_SLEEP_DEFAULT_US: u64 = 10;

/// In-flight requests per instance: one (src, dest) buffer pair per slot.
pub(crate) const RING_DEPTH: usize = 16;

/// Consecutive RETRY responses tolerated per instance before failing the stream.
pub(crate) const MAX_NUM_RETRY: u32 = 50;

/// Worst-case expansion slack per chunk on top of the 9/8 DEFLATE bound.
pub(crate) const SKID_PAD_SZ: usize = 128;

/// Scratch buffer size the accelerator requires per intermediate buffer.
pub(crate) fn inter_sz(hw_buff_sz: u32) -> usize {
    2 * hw_buff_sz as usize
}

/// DMA destination buffer size: worst-case DEFLATE expansion plus slack.
pub(crate) fn dma_dest_sz(hw_buff_sz: u32) -> usize {
    (9 * hw_buff_sz as usize) / 8 + 1024
}

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

/// Huffman table selection for hardware compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HuffmanHdr {
    /// Fixed tables; lowest latency.
    #[default]
    Static,
    /// Per-block tables computed by the engine.
    Dynamic,
}

/// Direction(s) the accelerator session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Direction {
    Compress,
    Decompress,
    #[default]
    Both,
}

/// Compression algorithm. DEFLATE is the only one supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Algorithm {
    #[default]
    Deflate,
}

/// Per-session configuration.
///
/// `Default` yields the built-in defaults; [`get_defaults`] yields the
/// process-wide defaults, which [`set_defaults`] can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionParams {
    pub huffman_hdr: HuffmanHdr,
    pub direction: Direction,
    /// Compression level, 1..=9. Level 9 always runs in software.
    pub comp_lvl: u32,
    pub comp_algorithm: Algorithm,
    /// Whether to fall back to the software codec when offload is unavailable.
    pub sw_backup: bool,
    /// Hardware chunk size in bytes; a power of two within the accepted range.
    pub hw_buff_sz: u32,
    /// Inputs shorter than this go straight to software.
    pub input_sz_thrshold: u32,
    /// Chunk-count boundary for spawning the submit worker thread.
    pub req_cnt_thrshold: u32,
    /// Sleep between poll rounds, in microseconds.
    pub poll_sleep_us: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            huffman_hdr: HuffmanHdr::Static,
            direction: Direction::Both,
            comp_lvl: 1,
            comp_algorithm: Algorithm::Deflate,
            sw_backup: true,
            hw_buff_sz: HW_BUFF_SZ_DEFAULT,
            input_sz_thrshold: INPUT_SZ_THRESHOLD_DEFAULT,
            req_cnt_thrshold: REQ_CNT_THRESHOLD_DEFAULT,
            poll_sleep_us: POLL_SLEEP_DEFAULT_US,
        }
    }
}

impl SessionParams {
    /// Check every field against the accepted ranges.
    pub fn validate(&self) -> bool {
        self.comp_lvl >= 1
            && self.comp_lvl <= 9
            && self.hw_buff_sz >= HW_BUFF_SZ_MIN
            && self.hw_buff_sz <= HW_BUFF_SZ_MAX
            && self.hw_buff_sz.is_power_of_two()
            && self.input_sz_thrshold >= INPUT_SZ_THRESHOLD_MIN
            && self.input_sz_thrshold <= HW_BUFF_SZ_MAX
            && self.req_cnt_thrshold >= REQ_CNT_THRESHOLD_MIN
            && self.req_cnt_thrshold <= REQ_CNT_THRESHOLD_MAX
    }

    /// log2 of the hardware buffer size, carried in the frame header.
    pub(crate) fn block_log2(&self) -> u8 {
        self.hw_buff_sz.trailing_zeros() as u8
    }
}

// ---------------------------------------------------------------------------
// Process-wide defaults
// ---------------------------------------------------------------------------

static DEFAULTS: LazyLock<Mutex<SessionParams>> =
    LazyLock::new(|| Mutex::new(SessionParams::default()));

/// Current process-wide default parameters.
pub fn get_defaults() -> SessionParams {
    *DEFAULTS.lock().unwrap()
}

/// Replace the process-wide defaults. Rejects out-of-range values.
pub fn set_defaults(params: &SessionParams) -> Status {
    if !params.validate() {
        return Status::Params;
    }
    *DEFAULTS.lock().unwrap() = *params;
    Status::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SessionParams::default().validate());
    }

    #[test]
    fn test_comp_lvl_range() {
        let mut p = SessionParams::default();
        p.comp_lvl = 0;
        assert!(!p.validate());
        p.comp_lvl = 10;
        assert!(!p.validate());
        p.comp_lvl = 9;
        assert!(p.validate());
    }

    #[test]
    fn test_hw_buff_sz_power_of_two() {
        let mut p = SessionParams::default();
        p.hw_buff_sz = 96 * 1024;
        assert!(!p.validate());
        p.hw_buff_sz = 128 * 1024;
        assert!(p.validate());
    }

    #[test]
    fn test_hw_buff_sz_bounds() {
        let mut p = SessionParams::default();
        p.hw_buff_sz = HW_BUFF_SZ_MIN / 2;
        assert!(!p.validate());
        p.hw_buff_sz = HW_BUFF_SZ_MAX * 2;
        assert!(!p.validate());
    }

    #[test]
    fn test_input_threshold_bounds() {
        let mut p = SessionParams::default();
        p.input_sz_thrshold = INPUT_SZ_THRESHOLD_MIN - 1;
        assert!(!p.validate());
        p.input_sz_thrshold = HW_BUFF_SZ_MAX;
        assert!(p.validate());
        p.input_sz_thrshold = HW_BUFF_SZ_MAX + 1;
        assert!(!p.validate());
    }

    #[test]
    fn test_req_cnt_threshold_bounds() {
        let mut p = SessionParams::default();
        p.req_cnt_thrshold = 0;
        assert!(!p.validate());
        p.req_cnt_thrshold = REQ_CNT_THRESHOLD_MAX + 1;
        assert!(!p.validate());
    }

    #[test]
    fn test_set_defaults_rejects_invalid() {
        let mut p = SessionParams::default();
        p.comp_lvl = 42;
        assert_eq!(set_defaults(&p), Status::Params);
        // The stored defaults are untouched.
        assert!(get_defaults().validate());
    }

    #[test]
    fn test_block_log2() {
        let p = SessionParams::default();
        assert_eq!(p.block_log2(), 16);
    }
}

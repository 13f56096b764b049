//! Per-caller sessions.
//!
//! A session carries validated parameters, the sticky instance hint, the
//! lazily-created software decoder state and the last call's byte totals.
//! Sessions are cheap; the expensive state (driver, DMA rings) lives in
//! the process-wide pool, which must outlive every session.

use crate::params::{self, SessionParams};
use crate::status::Status;
use crate::sw::Inflater;
use crate::{compress, decompress, pool};

/// Result of one compress or decompress call.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub status: Status,
    /// Input bytes consumed (payload for compress, stream bytes for decompress).
    pub consumed: usize,
    /// Output bytes written.
    pub produced: usize,
}

/// A compression/decompression session.
pub struct Session {
    pub(crate) params: SessionParams,
    pub(crate) configured: bool,
    /// Hardware-availability verdict latched at setup time.
    pub(crate) hw_status: Status,
    /// Last instance this session ran on; tried first next time.
    pub(crate) inst_hint: Option<u16>,
    /// Reusable software decoder, created on first use.
    pub(crate) inflater: Option<Inflater>,
    total_in: u64,
    total_out: u64,
}

impl Session {
    /// Create an unconfigured session. The first call configures it with
    /// the process-wide defaults; call [`Session::setup`] to override.
    pub fn new() -> Self {
        Self {
            params: params::get_defaults(),
            configured: false,
            hw_status: Status::Ok,
            inst_hint: None,
            inflater: None,
            total_in: 0,
            total_out: 0,
        }
    }

    /// (Re)configure the session. `None` adopts the process-wide defaults.
    ///
    /// Returns the session's hardware verdict: OK when the accelerator is
    /// usable, NO_HW when calls will route to software, NOSW_NO_HW when
    /// they will fail.
    pub fn setup(&mut self, params: Option<&SessionParams>) -> Status {
        match params {
            None => self.params = params::get_defaults(),
            Some(p) => {
                if !p.validate() {
                    return Status::Params;
                }
                self.params = *p;
            }
        }
        self.inst_hint = None;
        self.inflater = None;
        self.configured = true;

        self.hw_status = if pool::status() == Status::Ok {
            Status::Ok
        } else if self.params.sw_backup {
            Status::NoHw
        } else {
            Status::NoswNoHw
        };
        self.hw_status
    }

    /// Compress `src` into `dest` as a sequence of framed gzip chunks.
    ///
    /// `last` marks the end of the logical stream (accepted for API
    /// symmetry; chunks are stateless).
    pub fn compress(&mut self, src: &[u8], dest: &mut [u8], last: bool) -> Outcome {
        compress::compress_call(self, src, dest, last, None)
    }

    /// Like [`Session::compress`], also reporting the CRC32 of the
    /// consumed input through `crc`.
    pub fn compress_with_crc(
        &mut self,
        src: &[u8],
        dest: &mut [u8],
        last: bool,
        crc: &mut u32,
    ) -> Outcome {
        compress::compress_call(self, src, dest, last, Some(crc))
    }

    /// Decompress a sequence of framed chunks (or a standard gzip stream)
    /// from `src` into `dest`.
    pub fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Outcome {
        decompress::decompress_call(self, src, dest)
    }

    /// Release per-session state. The session can be set up again.
    pub fn teardown(&mut self) -> Status {
        self.inflater = None;
        self.configured = false;
        self.inst_hint = None;
        Status::Ok
    }

    /// Total input bytes of the last call.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Total output bytes of the last call.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub(crate) fn record_totals(&mut self, total_in: u64, total_out: u64) {
        self.total_in = total_in;
        self.total_out = total_out;
    }

    /// The backup setting `init` should run with: the session's own when
    /// configured, the process default otherwise.
    pub(crate) fn sw_backup_default(&self) -> bool {
        if self.configured {
            self.params.sw_backup
        } else {
            params::get_defaults().sw_backup
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

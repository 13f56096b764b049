//! Per-call status codes.
//!
//! The public API reports outcomes as plain status codes rather than
//! `Result`: several of these (NO_HW, DUPLICATE, FORCE_SW) are routing
//! verdicts, not failures, and callers are expected to branch on them.

use serde::Serialize;

/// Outcome of an API call or of one phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// The call succeeded.
    Ok,
    /// A null, out-of-range, or inconsistent argument.
    Params,
    /// An unrecoverable engine or driver error.
    Fail,
    /// No accelerator available; calls route to software.
    NoHw,
    /// No accelerator available and software backup disabled.
    NoswNoHw,
    /// DMA buffer allocation failed; the call routed to software.
    LowMem,
    /// DMA buffer allocation failed and software backup disabled.
    NoswLowMem,
    /// Every accelerator instance was busy; the call routed to software.
    NoInstAttach,
    /// Every accelerator instance was busy and software backup disabled.
    NoswNoInstAttach,
    /// The destination buffer cannot hold the output.
    BufError,
    /// Corrupt or inconsistent input stream.
    DataError,
    /// The process-wide pool was already initialized.
    Duplicate,
    /// The stream demanded the software decoder for the rest of the call.
    ForceSw,
}

impl Status {
    /// Whether this status terminates the call successfully.
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Statuses from `init` that abort a compress/decompress call.
    ///
    /// NO_HW deliberately passes: the session layer routes to software.
    pub(crate) fn init_failed(self) -> bool {
        matches!(self, Status::Params | Status::NoswNoHw | Status::Fail)
    }

    /// Statuses from `Session::setup` that abort a compress/decompress call.
    pub(crate) fn setup_session_failed(self) -> bool {
        matches!(
            self,
            Status::Fail | Status::Params | Status::NoswNoHw | Status::NoswLowMem
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::Params => "invalid parameters",
            Status::Fail => "engine failure",
            Status::NoHw => "no hardware",
            Status::NoswNoHw => "no hardware, software backup disabled",
            Status::LowMem => "DMA allocation failed",
            Status::NoswLowMem => "DMA allocation failed, software backup disabled",
            Status::NoInstAttach => "no free instance",
            Status::NoswNoInstAttach => "no free instance, software backup disabled",
            Status::BufError => "destination buffer too small",
            Status::DataError => "corrupt input stream",
            Status::Duplicate => "already initialized",
            Status::ForceSw => "routed to software decoder",
        };
        f.write_str(s)
    }
}

/// Fold the per-thread status of a decompress call into its final verdict.
///
/// LOW_MEM and FORCE_SW mean chunks were successfully rerouted through the
/// software decoder, so the call as a whole succeeded.
pub(crate) fn fold_decompress_status(stat: Status, stopped: bool) -> Status {
    if stopped {
        match stat {
            Status::BufError | Status::DataError => stat,
            _ => Status::Fail,
        }
    } else {
        match stat {
            Status::Ok | Status::LowMem | Status::ForceSw => Status::Ok,
            Status::BufError | Status::DataError => stat,
            _ => Status::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_fail_set() {
        assert!(Status::Params.init_failed());
        assert!(Status::NoswNoHw.init_failed());
        assert!(Status::Fail.init_failed());
        assert!(!Status::NoHw.init_failed());
        assert!(!Status::Duplicate.init_failed());
        assert!(!Status::Ok.init_failed());
    }

    #[test]
    fn test_fold_decompress_status() {
        assert_eq!(fold_decompress_status(Status::Ok, false), Status::Ok);
        assert_eq!(fold_decompress_status(Status::LowMem, false), Status::Ok);
        assert_eq!(fold_decompress_status(Status::ForceSw, false), Status::Ok);
        assert_eq!(
            fold_decompress_status(Status::BufError, false),
            Status::BufError
        );
        assert_eq!(
            fold_decompress_status(Status::DataError, true),
            Status::DataError
        );
        assert_eq!(fold_decompress_status(Status::NoswLowMem, false), Status::Fail);
        // A stopped pipeline with an otherwise clean status is a failure.
        assert_eq!(fold_decompress_status(Status::Ok, true), Status::Fail);
    }

    #[test]
    fn test_display_is_lowercase_prose() {
        assert_eq!(Status::Ok.to_string(), "ok");
        assert_eq!(Status::BufError.to_string(), "destination buffer too small");
    }
}

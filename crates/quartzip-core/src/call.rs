//! State shared between the submit and drain halves of one call.
//!
//! A call is a pair of loops over one instance's slot ring: submit
//! produces requests, drain consumes completions in submission order. They
//! may run on one thread (serially) or two; either way this is the only
//! state they share, and each field has a single writer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::accel::{AccelDriver, DcRequest, SubmitStatus};
use crate::params::MAX_NUM_RETRY;
use crate::pool::{Instance, InstanceMem};
use crate::slot::{self, Slot};
use crate::status::Status;

/// Sentinel for "no software tail pending".
pub(crate) const NO_SW_RESUME: usize = usize::MAX;

pub(crate) struct CallShared {
    /// Drain tells submit to wind down after an error.
    pub stop_submitting: AtomicBool,
    /// Submit has issued (or abandoned) its final request.
    pub last_submitted: AtomicBool,
    pub submitted: AtomicU32,
    pub processed: AtomicU32,
    /// Payload bytes consumed / emitted, as the caller counts them.
    pub in_len: AtomicU64,
    pub out_len: AtomicU64,
    /// Source offset where a decompress call hands over to software.
    pub sw_resume: AtomicUsize,
    stat: Mutex<Status>,
}

impl CallShared {
    pub fn new() -> Self {
        Self {
            stop_submitting: AtomicBool::new(false),
            last_submitted: AtomicBool::new(false),
            submitted: AtomicU32::new(0),
            processed: AtomicU32::new(0),
            in_len: AtomicU64::new(0),
            out_len: AtomicU64::new(0),
            sw_resume: AtomicUsize::new(NO_SW_RESUME),
            stat: Mutex::new(Status::Ok),
        }
    }

    pub fn stat(&self) -> Status {
        *self.stat.lock().unwrap()
    }

    pub fn set_stat(&self, stat: Status) {
        *self.stat.lock().unwrap() = stat;
    }

    pub fn stop(&self) {
        self.stop_submitting.store(true, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.stop_submitting.load(Ordering::Acquire)
    }

    /// Whether requests are still outstanding (or still being produced).
    pub fn pending(&self) -> bool {
        !self.last_submitted.load(Ordering::Acquire)
            || self.processed.load(Ordering::Acquire) < self.submitted.load(Ordering::Acquire)
    }
}

/// Claim an idle slot, spinning with a short nanosleep while the ring is
/// full. The drain side is guaranteed to free slots, so this terminates.
pub(crate) fn claim_slot(slots: &[Slot], hint: usize) -> usize {
    loop {
        if let Some(j) = slot::find_idle(slots, hint) {
            return j;
        }
        std::thread::sleep(Duration::from_nanos(10));
    }
}

/// Issue one request, absorbing RETRY responses with a `poll_sleep`
/// back-off up to the per-instance cap.
pub(crate) fn submit_with_retry(
    driver: &dyn AccelDriver,
    inst: &Instance,
    i: u16,
    req: &DcRequest,
    poll_sleep: Duration,
) -> Result<(), Status> {
    loop {
        match driver.submit(i, req) {
            SubmitStatus::Ok => {
                inst.num_retries.store(0, Ordering::Relaxed);
                return Ok(());
            }
            SubmitStatus::Retry => {
                let retries = inst.num_retries.fetch_add(1, Ordering::Relaxed) + 1;
                if retries > MAX_NUM_RETRY {
                    log::error!(
                        "instance {i} retry count {retries} exceeded the cap {MAX_NUM_RETRY}"
                    );
                    return Err(Status::Fail);
                }
                std::thread::sleep(poll_sleep);
            }
            SubmitStatus::Fail => {
                log::error!("request submission on instance {i} failed");
                return Err(Status::Fail);
            }
        }
    }
}

/// Drain every outstanding request after an error, discarding output, so
/// the ring returns to idle and the instance is immediately reusable.
pub(crate) fn quiesce(
    driver: &dyn AccelDriver,
    i: u16,
    mem: &InstanceMem,
    shared: &CallShared,
    poll_sleep: Duration,
) {
    while shared.pending() {
        let _ = driver.poll(i);
        for slot in &mem.slots {
            if slot.completed_undrained() {
                slot.io().restore();
                slot.finish_drain();
                shared.processed.fetch_add(1, Ordering::AcqRel);
            }
        }
        if shared.pending() {
            std::thread::sleep(poll_sleep);
        }
    }
}

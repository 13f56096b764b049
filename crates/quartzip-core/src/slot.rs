//! Per-slot state machine for in-flight requests.
//!
//! Each slot carries four monotone counters forming a four-phase handshake
//! between the submit loop (writes `src1`, `src2`), the completion
//! callback (writes `sink1`) and the drain loop (writes `sink2`):
//!
//! ```text
//! idle       src1 == src2 == sink1 == sink2
//! reserved   src1 == src2 + 1                  (submit picked the slot)
//! in-flight  src1 == src2 == sink1 + 1         (request handed to the device)
//! completed  src2 == sink1 == sink2 + 1        (callback recorded the result)
//! drained    all equal again                   (drain emitted the output)
//! ```
//!
//! Every counter has exactly one writer, so plain release stores and
//! acquire loads suffice. The callback writes the job status and results
//! *before* its `sink1` increment; the drain reads them only after
//! observing that increment.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::accel::{DcJobStatus, DcResults};
use crate::dma::{DmaBuffer, DmaRef};

/// Transfer state guarded by the counters. Locked only for short metadata
/// and copy windows; the handshake keeps the lock uncontended.
pub(crate) struct SlotIo {
    pub src_buf: DmaBuffer,
    pub dest_buf: DmaBuffer,
    /// Decompress swaps the (src, dest) ring buffers so the larger one
    /// receives the compressed input; drained slots swap back.
    pub swapped: bool,
    /// Caller-pinned source region standing in for `src_buf`.
    pub src_override: Option<DmaRef>,
    /// Caller-pinned destination region standing in for `dest_buf`.
    pub dest_override: Option<DmaRef>,
    pub job_status: DcJobStatus,
    pub result: DcResults,
    /// Stashed from the chunk footer on decompress for post-verification.
    pub footer_crc: u32,
    pub footer_orig_len: u32,
}

impl SlotIo {
    /// Source region the next request should carry.
    pub fn src_ref(&self, len: usize) -> DmaRef {
        match self.src_override {
            Some(r) => r,
            None => self.src_buf.dma_ref().slice(0, len),
        }
    }

    /// Destination region the next request should carry.
    pub fn dest_ref(&self, budget: usize) -> DmaRef {
        match self.dest_override {
            Some(r) => r,
            None => self.dest_buf.dma_ref().slice(0, budget.min(self.dest_buf.len())),
        }
    }

    /// Drop pinned-buffer overrides and undo a ring swap. Unconditional
    /// and infallible; safe to call on every exit path.
    pub fn restore(&mut self) {
        self.src_override = None;
        self.dest_override = None;
        if self.swapped {
            std::mem::swap(&mut self.src_buf, &mut self.dest_buf);
            self.swapped = false;
        }
    }
}

/// One ring element of an instance.
pub(crate) struct Slot {
    seq: AtomicU32,
    src1: AtomicU32,
    src2: AtomicU32,
    sink1: AtomicU32,
    sink2: AtomicU32,
    io: Mutex<SlotIo>,
}

impl Slot {
    pub fn new(src_buf: DmaBuffer, dest_buf: DmaBuffer) -> Self {
        Self {
            seq: AtomicU32::new(0),
            src1: AtomicU32::new(0),
            src2: AtomicU32::new(0),
            sink1: AtomicU32::new(0),
            sink2: AtomicU32::new(0),
            io: Mutex::new(SlotIo {
                src_buf,
                dest_buf,
                swapped: false,
                src_override: None,
                dest_override: None,
                job_status: DcJobStatus::Fail,
                result: DcResults::default(),
                footer_crc: 0,
                footer_orig_len: 0,
            }),
        }
    }

    fn load(&self) -> (u32, u32, u32, u32) {
        (
            self.src1.load(Ordering::Acquire),
            self.src2.load(Ordering::Acquire),
            self.sink1.load(Ordering::Acquire),
            self.sink2.load(Ordering::Acquire),
        )
    }

    /// All four counters equal: nothing in flight.
    pub fn is_idle(&self) -> bool {
        let (s1, s2, k1, k2) = self.load();
        s1 == s2 && s1 == k1 && s1 == k2
    }

    pub fn seq(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    pub fn set_seq(&self, seq: u32) {
        self.seq.store(seq, Ordering::Release);
    }

    /// Submit picked this slot.
    pub fn reserve(&self) {
        self.src1.fetch_add(1, Ordering::Release);
    }

    /// Submit handed the request to the device.
    pub fn mark_submitted(&self) {
        self.src2.fetch_add(1, Ordering::Release);
    }

    /// Undo `reserve` + `mark_submitted` after a failed hand-off.
    pub fn rollback_submit(&self) {
        self.src2.fetch_sub(1, Ordering::Release);
        self.src1.fetch_sub(1, Ordering::Release);
    }

    /// Completion callback: verify the handshake, record the outcome,
    /// advance `sink1`. A mismatch advances nothing and returns false.
    pub fn complete(&self, status: DcJobStatus, results: DcResults) -> bool {
        let (s1, s2, k1, k2) = self.load();
        if s1 != s2 || k1 != k2 || s2 != k1 + 1 {
            return false;
        }
        {
            let mut io = self.io.lock().unwrap();
            io.job_status = status;
            io.result = results;
        }
        self.sink1.fetch_add(1, Ordering::Release);
        true
    }

    /// Whether this slot holds the next in-order completed request.
    pub fn ready_for_drain(&self, seq_in: u32) -> bool {
        if self.seq() != seq_in {
            return false;
        }
        let (s1, s2, k1, k2) = self.load();
        s1 == s2 && k1 == s1 && k1 == k2 + 1
    }

    /// Completed but not yet drained, ignoring sequence order. Used when
    /// unwinding a failed call.
    pub fn completed_undrained(&self) -> bool {
        let (s1, s2, k1, k2) = self.load();
        s1 == s2 && k1 == s1 && k1 == k2 + 1
    }

    /// Drain emitted (or discarded) this slot's output.
    pub fn finish_drain(&self) {
        self.sink2.fetch_add(1, Ordering::Release);
    }

    pub fn io(&self) -> std::sync::MutexGuard<'_, SlotIo> {
        self.io.lock().unwrap()
    }
}

/// Linear scan for an idle slot starting at `hint`, wrapping once.
pub(crate) fn find_idle(slots: &[Slot], hint: usize) -> Option<usize> {
    let n = slots.len();
    let start = if hint >= n { 0 } else { hint };
    for k in start..n {
        if slots[k].is_idle() {
            return Some(k);
        }
    }
    for (k, slot) in slots.iter().enumerate().take(start) {
        if slot.is_idle() {
            return Some(k);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma;

    fn slot() -> Slot {
        Slot::new(dma::alloc(64, 0).unwrap(), dma::alloc(128, 0).unwrap())
    }

    fn results(consumed: u32, produced: u32) -> DcResults {
        DcResults {
            consumed,
            produced,
            checksum: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Handshake phases
    // -----------------------------------------------------------------------

    #[test]
    fn test_full_cycle() {
        let s = slot();
        assert!(s.is_idle());

        s.set_seq(0);
        s.reserve();
        assert!(!s.is_idle());
        assert!(!s.ready_for_drain(0));

        s.mark_submitted();
        assert!(!s.ready_for_drain(0));

        assert!(s.complete(DcJobStatus::Ok, results(10, 8)));
        assert!(s.ready_for_drain(0));
        assert!(s.completed_undrained());
        assert_eq!(s.io().result.produced, 8);

        s.finish_drain();
        assert!(s.is_idle());
        assert!(!s.ready_for_drain(0));
    }

    #[test]
    fn test_drain_gated_on_seq() {
        let s = slot();
        s.set_seq(3);
        s.reserve();
        s.mark_submitted();
        assert!(s.complete(DcJobStatus::Ok, results(1, 1)));
        assert!(!s.ready_for_drain(2));
        assert!(s.ready_for_drain(3));
    }

    #[test]
    fn test_completion_rejected_unless_in_flight() {
        let s = slot();
        // Idle: nothing in flight.
        assert!(!s.complete(DcJobStatus::Ok, results(0, 0)));
        // Reserved but not submitted.
        s.reserve();
        assert!(!s.complete(DcJobStatus::Ok, results(0, 0)));
        // Submitted: accepted once, then rejected.
        s.mark_submitted();
        assert!(s.complete(DcJobStatus::Ok, results(0, 0)));
        assert!(!s.complete(DcJobStatus::Ok, results(0, 0)));
    }

    #[test]
    fn test_rollback_returns_to_idle() {
        let s = slot();
        s.reserve();
        s.mark_submitted();
        s.rollback_submit();
        assert!(s.is_idle());
    }

    #[test]
    fn test_second_cycle_reuses_slot() {
        let s = slot();
        for seq in 0..3 {
            s.set_seq(seq);
            s.reserve();
            s.mark_submitted();
            assert!(s.complete(DcJobStatus::Ok, results(1, 1)));
            assert!(s.ready_for_drain(seq));
            s.finish_drain();
            assert!(s.is_idle());
        }
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    #[test]
    fn test_restore_undoes_swap_and_overrides() {
        let s = slot();
        let src_addr = s.io().src_buf.dma_ref().addr();
        {
            let mut io_guard = s.io();
            let io = &mut *io_guard;
            std::mem::swap(&mut io.src_buf, &mut io.dest_buf);
            io.swapped = true;
            io.src_override = Some(DmaRef::from_raw(std::ptr::null(), 0));
            io.restore();
            assert!(!io.swapped);
            assert!(io.src_override.is_none());
            assert_eq!(io.src_buf.dma_ref().addr(), src_addr);
        }
    }

    // -----------------------------------------------------------------------
    // Idle scan
    // -----------------------------------------------------------------------

    #[test]
    fn test_find_idle_prefers_hint() {
        let slots: Vec<Slot> = (0..4).map(|_| slot()).collect();
        assert_eq!(find_idle(&slots, 2), Some(2));
    }

    #[test]
    fn test_find_idle_wraps() {
        let slots: Vec<Slot> = (0..4).map(|_| slot()).collect();
        slots[2].reserve();
        slots[3].reserve();
        assert_eq!(find_idle(&slots, 2), Some(0));
    }

    #[test]
    fn test_find_idle_none_when_all_busy() {
        let slots: Vec<Slot> = (0..2).map(|_| slot()).collect();
        slots[0].reserve();
        slots[1].reserve();
        assert_eq!(find_idle(&slots, 0), None);
    }

    #[test]
    fn test_find_idle_out_of_range_hint() {
        let slots: Vec<Slot> = (0..2).map(|_| slot()).collect();
        assert_eq!(find_idle(&slots, 99), Some(0));
    }
}

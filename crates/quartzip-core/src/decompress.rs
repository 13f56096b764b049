//! The decompression pipeline: orchestrator, submit loop, drain loop.
//!
//! The submit loop walks the framed input, validates each member header,
//! and issues hardware requests sized from the header fields; the drain
//! loop emits output in submission order and verifies each chunk against
//! its footer. Streams (or stream tails) the hardware cannot take —
//! standard gzip members, frames larger than the ring buffers — are
//! handed to the software decoder for the remainder of the call.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::accel::{AccelDriver, DcJobStatus, DcOp, DcRequest};
use crate::call::{self, CallShared, NO_SW_RESUME};
use crate::dma::{self, DmaRef};
use crate::gzip::{self, FrameHeader, Header};
use crate::params::{self, SessionParams};
use crate::pool::{self, Instance, InstanceMem};
use crate::session::{Outcome, Session};
use crate::status::{Status, fold_decompress_status};
use crate::sw;

/// Entry point behind [`Session::decompress`].
pub(crate) fn decompress_call(sess: &mut Session, src: &[u8], dest: &mut [u8]) -> Outcome {
    if src.is_empty() {
        return Outcome {
            status: Status::Ok,
            consumed: 0,
            produced: 0,
        };
    }

    let rc = pool::init(sess.sw_backup_default());
    if rc.init_failed() {
        return fail_outcome(rc);
    }
    if !sess.configured {
        let rc = sess.setup(None);
        if rc.setup_session_failed() {
            return fail_outcome(rc);
        }
    }

    // The software route: a stream some other gzip produced, a first
    // chunk too small to amortize offload, or no hardware. A header that
    // parses as neither kind goes to software too, where the decoder
    // reports the precise error.
    let route_sw = match gzip::parse_header(src) {
        Ok(Header::Framed(h)) => (h.original_len as usize) < sess.params.input_sz_thrshold as usize,
        Ok(Header::Standard) => true,
        Err(_) => true,
    };
    if route_sw || pool::status() == Status::NoHw || sess.hw_status == Status::NoHw {
        log::debug!("decompress: routing {} bytes to software", src.len());
        return sw::sw_decompress(sess, src, dest);
    } else if sess.hw_status != Status::Ok && sess.hw_status != Status::NoInstAttach {
        return fail_outcome(sess.hw_status);
    }

    let Some(i) = pool::grab_instance(sess.inst_hint) else {
        if sess.params.sw_backup {
            return sw::sw_decompress(sess, src, dest);
        }
        sess.hw_status = Status::NoInstAttach;
        return fail_outcome(Status::NoswNoInstAttach);
    };
    sess.inst_hint = Some(i);

    let inst = match pool::instance(i) {
        Some(inst) => inst,
        None => {
            pool::release_instance(i);
            return fail_outcome(Status::Fail);
        }
    };
    if inst.needs_setup() {
        let rc = pool::setup_hw(i, &sess.params);
        if rc != Status::Ok {
            pool::release_instance(i);
            return match rc {
                Status::LowMem | Status::NoInstAttach => sw::sw_decompress(sess, src, dest),
                other => fail_outcome(other),
            };
        }
    }
    let (Some(driver), Some(mem)) = (pool::driver(), inst.mem()) else {
        pool::release_instance(i);
        return fail_outcome(Status::Fail);
    };

    let shared = CallShared::new();
    let dest_pinned = dma::find_addr(dest.as_ptr());
    let dest_base = dest.as_ptr() as usize;
    let dest_cap = dest.len();
    let poll_sleep = Duration::from_micros(sess.params.poll_sleep_us);
    let sess_params = sess.params;

    // Compressed chunks run about half a buffer, so size the estimate on
    // hw_buff_sz / 2. The estimate under-counts highly compressible
    // streams, and a serial call must not submit more members than the
    // ring holds, so the actual member count gates the serial path too.
    let threshold = sess_params.req_cnt_thrshold as usize;
    let reqcnt = src
        .len()
        .div_ceil((sess_params.hw_buff_sz / 2) as usize)
        .max(framed_member_count(src, threshold + 1));
    if reqcnt > threshold {
        std::thread::scope(|s| {
            s.spawn(|| {
                submit_loop(
                    &driver,
                    &inst,
                    i,
                    &mem,
                    &sess_params,
                    src,
                    dest_base,
                    dest_cap,
                    dest_pinned,
                    &shared,
                );
            });
            drain_loop(&driver, i, &mem, dest, &shared, poll_sleep);
        });
    } else {
        submit_loop(
            &driver,
            &inst,
            i,
            &mem,
            &sess_params,
            src,
            dest_base,
            dest_cap,
            dest_pinned,
            &shared,
        );
        drain_loop(&driver, i, &mem, dest, &shared, poll_sleep);
    }

    pool::release_instance(i);

    // A mid-stream fallback leaves the rest of the input for the software
    // decoder, force_sw-style: once software, software to the end.
    let resume = shared.sw_resume.load(Ordering::Acquire);
    if resume != NO_SW_RESUME && !shared.stopped() {
        let out_so_far = shared.out_len.load(Ordering::Acquire) as usize;
        log::debug!("decompress: software tail from offset {resume}");
        let (consumed, produced, tail_stat) =
            sw::decompress_members(&mut sess.inflater, &src[resume..], &mut dest[out_so_far..]);
        shared.in_len.fetch_add(consumed as u64, Ordering::AcqRel);
        shared.out_len.fetch_add(produced as u64, Ordering::AcqRel);
        if tail_stat != Status::Ok {
            shared.set_stat(tail_stat);
        }
    }

    let consumed = shared.in_len.load(Ordering::Acquire);
    let produced = shared.out_len.load(Ordering::Acquire);
    sess.record_totals(consumed, produced);
    Outcome {
        status: fold_decompress_status(shared.stat(), shared.stopped()),
        consumed: consumed as usize,
        produced: produced as usize,
    }
}

fn fail_outcome(status: Status) -> Outcome {
    Outcome {
        status,
        consumed: 0,
        produced: 0,
    }
}

/// Count framed members, stopping at `limit` or at the first member the
/// hardware path would not take anyway.
fn framed_member_count(src: &[u8], limit: usize) -> usize {
    let mut count = 0;
    let mut at = 0;
    while count < limit && at < src.len() {
        match gzip::parse_header(&src[at..]) {
            Ok(Header::Framed(h)) => {
                count += 1;
                at += gzip::HEADER_SZ + h.compressed_len as usize + gzip::FOOTER_SZ;
            }
            _ => break,
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Header validation
// ---------------------------------------------------------------------------

enum ChunkVerdict {
    /// Offload this frame.
    Hw(FrameHeader),
    /// This and everything after it goes through the software decoder.
    SwTail(Status),
    /// Unrecoverable; stop the call.
    Reject(Status),
}

fn check_chunk(
    params: &SessionParams,
    rest: &[u8],
    dest_avail: i64,
) -> ChunkVerdict {
    if dest_avail <= 0 {
        return ChunkVerdict::Reject(Status::BufError);
    }

    let h = match gzip::parse_header(rest) {
        Ok(Header::Framed(h)) => h,
        // A standard member mid-stream demands the software decoder.
        Ok(Header::Standard) => return ChunkVerdict::SwTail(Status::ForceSw),
        Err(_) => return ChunkVerdict::Reject(Status::DataError),
    };

    // Frames from a producer with a larger ring don't fit our buffers.
    if h.compressed_len as usize > params::dma_dest_sz(params.hw_buff_sz)
        || h.original_len > params.hw_buff_sz
    {
        return if params.sw_backup {
            ChunkVerdict::SwTail(Status::LowMem)
        } else {
            ChunkVerdict::Reject(Status::NoswLowMem)
        };
    }

    let member_len = gzip::HEADER_SZ + h.compressed_len as usize + gzip::FOOTER_SZ;
    if member_len > rest.len() {
        log::debug!("decompress: incomplete member, need {member_len} have {}", rest.len());
        return ChunkVerdict::Reject(Status::DataError);
    }
    if h.original_len as i64 > dest_avail {
        return ChunkVerdict::Reject(Status::BufError);
    }

    ChunkVerdict::Hw(h)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn submit_loop(
    driver: &Arc<dyn AccelDriver>,
    inst: &Instance,
    i: u16,
    mem: &InstanceMem,
    params: &SessionParams,
    src: &[u8],
    dest_base: usize,
    dest_cap: usize,
    dest_pinned: bool,
    shared: &CallShared,
) {
    let src_pinned = dma::find_addr(src.as_ptr());
    let poll_sleep = Duration::from_micros(params.poll_sleep_us);

    let mut seq: u32 = 0;
    let mut off = 0usize;
    let mut dest_off = 0usize;
    let mut dest_avail = dest_cap as i64;
    let mut hint = 0usize;

    while off < src.len() {
        if shared.stopped() {
            break;
        }

        let h = match check_chunk(params, &src[off..], dest_avail) {
            ChunkVerdict::Hw(h) => h,
            ChunkVerdict::SwTail(stat) => {
                shared.set_stat(stat);
                shared.sw_resume.store(off, Ordering::Release);
                break;
            }
            ChunkVerdict::Reject(stat) => {
                shared.set_stat(stat);
                break;
            }
        };
        let body_len = h.compressed_len as usize;
        let body = &src[off + gzip::HEADER_SZ..off + gzip::HEADER_SZ + body_len];

        let j = call::claim_slot(&mem.slots, hint);
        hint = j;
        let slot = &mem.slots[j];

        slot.reserve();
        slot.set_seq(seq);
        seq += 1;
        shared.submitted.fetch_add(1, Ordering::AcqRel);
        slot.mark_submitted();

        let req = {
            let mut io_guard = slot.io();
            let io = &mut *io_guard;
            // The destination ring buffer is the larger of the pair; swap
            // it to the source side, where the compressed input (up to
            // 9/8 of a block) lands.
            std::mem::swap(&mut io.src_buf, &mut io.dest_buf);
            io.swapped = true;

            let (crc, isize_) = gzip::parse_footer(&src[off + gzip::HEADER_SZ + body_len..])
                .unwrap_or((0, 0));
            io.footer_crc = crc;
            io.footer_orig_len = isize_;

            if src_pinned {
                io.src_override = Some(DmaRef::from_raw(body.as_ptr(), body_len));
            } else {
                io.src_buf.as_mut_slice()[..body_len].copy_from_slice(body);
                io.src_override = None;
            }
            if dest_pinned {
                io.dest_override = Some(DmaRef::from_raw(
                    (dest_base + dest_off) as *const u8,
                    h.original_len as usize,
                ));
            } else {
                io.dest_override = None;
            }

            DcRequest {
                tag: ((i as u64) << 16) | j as u64,
                op: DcOp::Decompress,
                src: io.src_ref(body_len),
                dst: io.dest_ref(h.original_len as usize),
                flush_final: true,
            }
        };

        if call::submit_with_retry(driver.as_ref(), inst, i, &req, poll_sleep).is_err() {
            shared.last_submitted.store(true, Ordering::Release);
            shared.submitted.fetch_sub(1, Ordering::AcqRel);
            slot.rollback_submit();
            slot.io().restore();
            shared.set_stat(Status::Fail);
            return;
        }

        off += gzip::HEADER_SZ + body_len + gzip::FOOTER_SZ;
        dest_off += h.original_len as usize;
        dest_avail -= h.original_len as i64;
    }

    shared.last_submitted.store(true, Ordering::Release);
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

fn drain_loop(
    driver: &Arc<dyn AccelDriver>,
    i: u16,
    mem: &InstanceMem,
    dest: &mut [u8],
    shared: &CallShared,
    poll_sleep: Duration,
) {
    let mut seq_in: u32 = 0;
    let mut cursor = 0usize;

    while shared.pending() {
        if driver.poll(i).is_err() {
            log::error!("poll failure on instance {i}");
            shared.set_stat(Status::Fail);
            shared.stop();
            call::quiesce(driver.as_ref(), i, mem, shared, poll_sleep);
            return;
        }

        let mut good = false;
        for slot in &mem.slots {
            if !slot.ready_for_drain(seq_in) {
                continue;
            }
            good = true;
            let mut io = slot.io();

            let failed = io.job_status != DcJobStatus::Ok;
            if failed {
                log::error!("engine reported failure on instance {i} seq {seq_in}");
            }
            seq_in += 1;
            let res = io.result;
            let produced = res.produced as usize;

            let footer_ok = !failed
                && res.checksum == io.footer_crc
                && res.produced == io.footer_orig_len;

            if !footer_ok {
                if !failed {
                    log::error!("footer mismatch on instance {i} seq {}", seq_in - 1);
                }
                shared.set_stat(Status::DataError);
                io.restore();
                drop(io);
                slot.finish_drain();
                shared.processed.fetch_add(1, Ordering::AcqRel);
                shared.stop();
                call::quiesce(driver.as_ref(), i, mem, shared, poll_sleep);
                return;
            }

            if io.dest_override.is_some() {
                // Pinned destination: the engine wrote in place.
                io.dest_override = None;
            } else {
                dest[cursor..cursor + produced]
                    .copy_from_slice(&io.dest_buf.as_slice()[..produced]);
            }
            cursor += produced;

            io.restore();
            drop(io);
            slot.finish_drain();
            shared.processed.fetch_add(1, Ordering::AcqRel);
            shared.in_len.fetch_add(
                (gzip::HEADER_SZ + res.consumed as usize + gzip::FOOTER_SZ) as u64,
                Ordering::AcqRel,
            );
            shared.out_len.fetch_add(produced as u64, Ordering::AcqRel);
            break;
        }

        if !good && shared.pending() {
            std::thread::sleep(poll_sleep);
        }
    }
}

//! The compression pipeline: orchestrator, submit loop, drain loop.
//!
//! The orchestrator decides hardware vs software, binds an instance, and
//! runs the paired loops over its slot ring. The submit loop chunks the
//! input at `hw_buff_sz` and issues asynchronous requests; the drain loop
//! polls completions and emits framed chunks in strict submission order.

use std::sync::Arc;
use std::time::Duration;

use crate::accel::{AccelDriver, DcJobStatus, DcOp, DcRequest};
use crate::call::{self, CallShared};
use crate::checksum::crc32_combine;
use crate::dma::{self, DmaRef};
use crate::gzip;
use crate::params::SessionParams;
use crate::pool::{self, Instance, InstanceMem};
use crate::session::{Outcome, Session};
use crate::status::Status;
use crate::sw;

/// Entry point behind [`Session::compress`] and
/// [`Session::compress_with_crc`].
pub(crate) fn compress_call(
    sess: &mut Session,
    src: &[u8],
    dest: &mut [u8],
    last: bool,
    mut crc: Option<&mut u32>,
) -> Outcome {
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
    if let Some(c) = crc.as_deref_mut() {
        *c = 0;
    }

    // The software route: input too small to amortize offload, no
    // hardware, or a level the engine does not implement.
    if src.len() < sess.params.input_sz_thrshold as usize
        || pool::status() == Status::NoHw
        || sess.hw_status == Status::NoHw
        || sess.params.comp_lvl == 9
    {
        log::debug!(
            "compress: routing {} bytes to software (threshold {}, level {})",
            src.len(),
            sess.params.input_sz_thrshold,
            sess.params.comp_lvl
        );
        return sw::sw_compress(sess, src, dest, last, crc);
    } else if sess.hw_status != Status::Ok && sess.hw_status != Status::NoInstAttach {
        return fail_outcome(sess.hw_status);
    }

    let Some(i) = pool::grab_instance(sess.inst_hint) else {
        if sess.params.sw_backup {
            return sw::sw_compress(sess, src, dest, last, crc);
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
                Status::LowMem | Status::NoInstAttach => sw::sw_compress(sess, src, dest, last, crc),
                other => fail_outcome(other),
            };
        }
    }
    let (Some(driver), Some(mem)) = (pool::driver(), inst.mem()) else {
        pool::release_instance(i);
        return fail_outcome(Status::Fail);
    };

    let shared = CallShared::new();
    let mut crc_acc: Option<u32> = None;
    let want_crc = crc.is_some();
    let dest_pinned = dma::find_addr(dest.as_ptr());
    let dest_base = dest.as_ptr() as usize;
    let dest_cap = dest.len();
    let poll_sleep = Duration::from_micros(sess.params.poll_sleep_us);
    let params = sess.params;

    let reqcnt = src.len().div_ceil(params.hw_buff_sz as usize);
    if reqcnt > params.req_cnt_thrshold as usize {
        std::thread::scope(|s| {
            s.spawn(|| {
                submit_loop(
                    &driver, &inst, i, &mem, &params, src, dest_base, dest_cap, dest_pinned,
                    &shared,
                );
            });
            drain_loop(
                &driver,
                i,
                &mem,
                &params,
                dest,
                &shared,
                &mut crc_acc,
                want_crc,
                poll_sleep,
            );
        });
    } else {
        submit_loop(
            &driver, &inst, i, &mem, &params, src, dest_base, dest_cap, dest_pinned, &shared,
        );
        drain_loop(
            &driver,
            i,
            &mem,
            &params,
            dest,
            &shared,
            &mut crc_acc,
            want_crc,
            poll_sleep,
        );
    }

    pool::release_instance(i);

    if let Some(c) = crc {
        *c = crc_acc.unwrap_or(0);
    }
    let consumed = shared.in_len.load(std::sync::atomic::Ordering::Acquire);
    let produced = shared.out_len.load(std::sync::atomic::Ordering::Acquire);
    sess.record_totals(consumed, produced);
    Outcome {
        status: shared.stat(),
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
    use std::sync::atomic::Ordering;

    let src_pinned = dma::find_addr(src.as_ptr());
    let block = params.hw_buff_sz as usize;
    let poll_sleep = Duration::from_micros(params.poll_sleep_us);

    let mut seq: u32 = 0;
    let mut off = 0usize;
    let mut hint = 0usize;

    loop {
        let j = call::claim_slot(&mem.slots, hint);
        hint = j;
        let slot = &mem.slots[j];

        slot.reserve();
        let chunk = (src.len() - off).min(block);
        slot.set_seq(seq);
        let this_seq = seq;
        seq += 1;
        shared.submitted.fetch_add(1, Ordering::AcqRel);
        slot.mark_submitted();

        let req = {
            let mut io = slot.io();
            if src_pinned {
                io.src_override = Some(DmaRef::from_raw(src[off..].as_ptr(), chunk));
            } else {
                io.src_buf.as_mut_slice()[..chunk].copy_from_slice(&src[off..off + chunk]);
                io.src_override = None;
            }

            // Zero-copy destination applies to the call's first chunk
            // only: later chunks land at offsets the drain side knows
            // first.
            if dest_pinned && this_seq == 0 && dest_cap > gzip::HEADER_SZ {
                let budget = (dest_cap - gzip::HEADER_SZ).min(io.dest_buf.len());
                io.dest_override = Some(DmaRef::from_raw(
                    (dest_base + gzip::HEADER_SZ) as *const u8,
                    budget,
                ));
            } else {
                io.dest_override = None;
            }

            DcRequest {
                tag: ((i as u64) << 16) | j as u64,
                op: DcOp::Compress,
                src: io.src_ref(chunk),
                dst: io.dest_ref(io.dest_buf.len()),
                flush_final: true,
            }
        };

        if call::submit_with_retry(driver.as_ref(), inst, i, &req, poll_sleep).is_err() {
            // Roll the reservation back so the slot reads idle again, and
            // drop the destination override unconditionally.
            shared.last_submitted.store(true, Ordering::Release);
            shared.submitted.fetch_sub(1, Ordering::AcqRel);
            slot.rollback_submit();
            slot.io().restore();
            shared.set_stat(Status::Fail);
            return;
        }

        off += chunk;
        if shared.stopped() {
            off = src.len();
        }
        if off >= src.len() {
            shared.last_submitted.store(true, Ordering::Release);
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn drain_loop(
    driver: &Arc<dyn AccelDriver>,
    i: u16,
    mem: &InstanceMem,
    params: &SessionParams,
    dest: &mut [u8],
    shared: &CallShared,
    crc_acc: &mut Option<u32>,
    want_crc: bool,
    poll_sleep: Duration,
) {
    use std::sync::atomic::Ordering;

    let mut seq_in: u32 = 0;
    let mut cursor = 0usize;
    let mut dest_avail = dest.len() as i64;

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

            if io.job_status != DcJobStatus::Ok {
                log::error!("engine reported failure on instance {i} seq {seq_in}");
                shared.set_stat(Status::Fail);
                io.restore();
                drop(io);
                slot.finish_drain();
                shared.processed.fetch_add(1, Ordering::AcqRel);
                shared.stop();
                call::quiesce(driver.as_ref(), i, mem, shared, poll_sleep);
                return;
            }

            seq_in += 1;
            let res = io.result;
            let produced = res.produced as usize;

            dest_avail -= (gzip::HEADER_SZ + produced + gzip::FOOTER_SZ) as i64;
            if dest_avail < 0 {
                log::debug!("compress: output budget exhausted at seq {}", seq_in - 1);
                shared.set_stat(Status::BufError);
                io.restore();
                drop(io);
                slot.finish_drain();
                shared.processed.fetch_add(1, Ordering::AcqRel);
                shared.stop();
                // Keep draining so the ring ends the call idle.
                break;
            }

            gzip::write_frame_header(
                &mut dest[cursor..],
                res.produced,
                res.consumed,
                params.block_log2(),
            );
            cursor += gzip::HEADER_SZ;

            if io.dest_override.is_some() {
                // First-chunk zero copy: the engine wrote in place.
                io.dest_override = None;
            } else {
                dest[cursor..cursor + produced]
                    .copy_from_slice(&io.dest_buf.as_slice()[..produced]);
            }
            cursor += produced;

            gzip::write_footer(&mut dest[cursor..], res.checksum, res.consumed);
            cursor += gzip::FOOTER_SZ;

            io.src_override = None;
            drop(io);
            slot.finish_drain();
            shared.processed.fetch_add(1, Ordering::AcqRel);
            shared
                .in_len
                .fetch_add(res.consumed as u64, Ordering::AcqRel);
            shared.out_len.fetch_add(
                (gzip::HEADER_SZ + produced + gzip::FOOTER_SZ) as u64,
                Ordering::AcqRel,
            );

            if want_crc {
                *crc_acc = Some(match *crc_acc {
                    None => res.checksum,
                    Some(acc) => crc32_combine(acc, res.checksum, res.consumed as u64),
                });
            }
            break;
        }

        if !good && shared.pending() {
            std::thread::sleep(poll_sleep);
        }
    }
}

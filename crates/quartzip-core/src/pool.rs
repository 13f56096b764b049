//! The process-wide accelerator instance pool.
//!
//! Driver state and DMA allocations are scarce and shared across threads,
//! so the pool is a singleton: initialized at most once under a mutex,
//! torn down by an `atexit` hook or an explicit [`close`], never
//! re-initialized after the hook has run.
//!
//! Instance DMA rings are provisioned lazily, the first time a session
//! lands on an instance, with the allocator pointed at the instance's NUMA
//! node. Discovery shuffles instances round-robin across physical packages
//! so consecutive session grabs spread across nodes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::accel::{
    self, AccelDriver, CompletionFn, DcJobStatus, DcResults, DcSessionCfg, InstanceInfo,
};
use crate::dma::{self, DmaBuffer};
use crate::params::{self, SessionParams, RING_DEPTH};
use crate::slot::Slot;
use crate::status::Status;

/// Attempts to start the driver before giving up on hardware.
const MAX_OPEN_RETRY: u32 = 10;
/// Back-off between driver start attempts.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// The DMA resources of one instance, built by lazy setup as a unit and
/// torn down as a unit.
pub(crate) struct InstanceMem {
    pub slots: Vec<Slot>,
    /// Scratch buffers owned for the device; held alive, never read here.
    #[allow(dead_code)]
    intermediate: Vec<DmaBuffer>,
}

/// One accelerator instance: a hardware queue pair plus its buffer rings.
pub(crate) struct Instance {
    pub info: InstanceInfo,
    lock: AtomicBool,
    pub num_retries: AtomicU32,
    mem_setup: AtomicBool,
    sess_setup: AtomicBool,
    mem: Mutex<Option<Arc<InstanceMem>>>,
}

impl Instance {
    fn new(info: InstanceInfo) -> Self {
        Self {
            info,
            lock: AtomicBool::new(false),
            num_retries: AtomicU32::new(0),
            mem_setup: AtomicBool::new(false),
            sess_setup: AtomicBool::new(false),
            mem: Mutex::new(None),
        }
    }

    pub fn needs_setup(&self) -> bool {
        !self.mem_setup.load(Ordering::Acquire) || !self.sess_setup.load(Ordering::Acquire)
    }

    pub fn mem(&self) -> Option<Arc<InstanceMem>> {
        self.mem.lock().unwrap().clone()
    }

    fn clear_mem(&self) {
        *self.mem.lock().unwrap() = None;
        self.mem_setup.store(false, Ordering::Release);
        self.sess_setup.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Process state
// ---------------------------------------------------------------------------

struct PoolState {
    init_called: bool,
    status: Status,
    sw_backup: bool,
    driver: Option<Arc<dyn AccelDriver>>,
    /// Set by the exit hook; the pool never comes back after that.
    exiting: bool,
}

static STATE: Mutex<PoolState> = Mutex::new(PoolState {
    init_called: false,
    status: Status::Ok,
    sw_backup: true,
    driver: None,
    exiting: false,
});

static INSTANCES: RwLock<Vec<Arc<Instance>>> = RwLock::new(Vec::new());

static EXIT_HOOK: Once = Once::new();

extern "C" fn pool_exit_hook() {
    // Runs during process teardown; nothing here may panic.
    let _ = std::panic::catch_unwind(|| {
        close_inner(true);
    });
}

// ---------------------------------------------------------------------------
// Init / teardown
// ---------------------------------------------------------------------------

/// Initialize the process-wide pool. Idempotent: a second call returns
/// [`Status::Duplicate`] and keeps the first call's state.
///
/// On any failure the pool records NO_HW (or NOSW_NO_HW when `sw_backup`
/// is off) so the session layer can route calls to software; the next
/// `init` attempt starts over.
pub fn init(sw_backup: bool) -> Status {
    let mut state = STATE.lock().unwrap();
    if state.exiting {
        return Status::Fail;
    }
    if state.init_called {
        return Status::Duplicate;
    }

    let backout = |state: &mut PoolState, started: Option<&Arc<dyn AccelDriver>>| {
        if let Some(driver) = started {
            driver.shutdown();
        }
        state.status = if sw_backup {
            Status::NoHw
        } else {
            Status::NoswNoHw
        };
        state.sw_backup = sw_backup;
        state.status
    };

    let Some(driver) = accel::installed_driver() else {
        log::debug!("no accelerator driver installed, pool init backs out");
        return backout(&mut state, None);
    };

    // Start the driver, round-robining the shared-device tags from the
    // pid with a fixed back-off, the way the multi-process config expects.
    let mut attempt = std::process::id() % 3;
    let mut infos = None;
    for _ in 0..=MAX_OPEN_RETRY {
        let tag = if driver.shared_devices() {
            accel::SHARED_DEV_TAGS[attempt as usize % 3]
        } else {
            accel::DEV_TAG
        };
        match driver.start(tag) {
            Ok(found) => {
                infos = Some(found);
                break;
            }
            Err(e) => {
                log::warn!("driver start under tag {tag} failed: {e}");
                std::thread::sleep(OPEN_RETRY_DELAY);
                attempt += 1;
            }
        }
    }
    let Some(infos) = infos else {
        log::error!("driver start failed after {MAX_OPEN_RETRY} retries");
        return backout(&mut state, None);
    };
    if infos.is_empty() {
        log::error!("driver reported zero instances");
        return backout(&mut state, Some(&driver));
    }
    log::debug!("discovered {} accelerator instance(s)", infos.len());

    let instances: Vec<Arc<Instance>> = shuffle_by_package(infos)
        .into_iter()
        .map(|info| Arc::new(Instance::new(info)))
        .collect();
    *INSTANCES.write().unwrap() = instances;

    // Exactly one teardown hook per process, across re-inits.
    let mut hook_ok = true;
    EXIT_HOOK.call_once(|| {
        hook_ok = unsafe { libc::atexit(pool_exit_hook) } == 0;
    });
    if !hook_ok {
        log::error!("failed to register process exit hook");
        INSTANCES.write().unwrap().clear();
        return backout(&mut state, Some(&driver));
    }

    state.driver = Some(driver);
    state.sw_backup = sw_backup;
    state.status = Status::Ok;
    state.init_called = true;
    Status::Ok
}

/// Tear the pool down: stop every instance, free its DMA rings, shut the
/// driver down. The pool can be re-initialized afterwards.
pub fn close() -> Status {
    close_inner(false);
    Status::Ok
}

fn close_inner(exiting: bool) {
    let mut state = STATE.lock().unwrap();
    if exiting {
        state.exiting = true;
    }
    if !state.init_called {
        return;
    }

    let instances = std::mem::take(&mut *INSTANCES.write().unwrap());
    if let Some(driver) = state.driver.take() {
        for (i, inst) in instances.iter().enumerate() {
            inst.clear_mem();
            driver.stop_instance(i as u16);
        }
        driver.shutdown();
    }
    state.init_called = false;
}

/// Round-robin instances across physical packages so consecutive grabs
/// land on different NUMA domains.
fn shuffle_by_package(infos: Vec<InstanceInfo>) -> Vec<InstanceInfo> {
    let max_package = infos.iter().map(|i| i.package_id).max().unwrap_or(0) as usize;
    let mut by_package: Vec<VecDeque<InstanceInfo>> = vec![VecDeque::new(); max_package + 1];
    for info in infos {
        by_package[info.package_id as usize].push_back(info);
    }

    let total: usize = by_package.iter().map(VecDeque::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut i = 0usize;
    while out.len() < total {
        if let Some(info) = by_package[i % (max_package + 1)].pop_front() {
            out.push(info);
        }
        i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// The pool's init status: OK, NO_HW or NOSW_NO_HW.
pub(crate) fn status() -> Status {
    STATE.lock().unwrap().status
}

pub(crate) fn driver() -> Option<Arc<dyn AccelDriver>> {
    STATE.lock().unwrap().driver.clone()
}

pub(crate) fn instance(i: u16) -> Option<Arc<Instance>> {
    INSTANCES.read().unwrap().get(i as usize).cloned()
}

// ---------------------------------------------------------------------------
// Instance acquisition
// ---------------------------------------------------------------------------

/// Try to lock an instance, preferring `hint`. Linear scan on contention;
/// `None` when every instance is busy (or the pool is down).
pub(crate) fn grab_instance(hint: Option<u16>) -> Option<u16> {
    let instances = INSTANCES.read().unwrap();
    if instances.is_empty() {
        return None;
    }

    let hint = (hint.unwrap_or(0) as usize).min(instances.len() - 1);
    if try_lock(&instances[hint]) {
        return Some(hint as u16);
    }
    for (i, inst) in instances.iter().enumerate() {
        if try_lock(inst) {
            return Some(i as u16);
        }
    }
    None
}

fn try_lock(inst: &Instance) -> bool {
    inst.lock
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

pub(crate) fn release_instance(i: u16) {
    if let Some(inst) = instance(i) {
        inst.lock.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Lazy per-instance setup
// ---------------------------------------------------------------------------

/// Provision instance `i` for this session: DMA rings on the instance's
/// node, then the accelerator session itself. Caller must hold the
/// instance lock.
pub(crate) fn setup_hw(i: u16, sess_params: &SessionParams) -> Status {
    let pool_status = status();
    if pool_status != Status::Ok {
        return pool_status;
    }
    let Some(driver) = driver() else {
        return Status::Fail;
    };
    let Some(inst) = instance(i) else {
        return Status::Fail;
    };
    let sw_backup = sess_params.sw_backup;

    if !inst.mem_setup.load(Ordering::Acquire) {
        log::debug!("setting up DMA rings for instance {i}");
        match alloc_instance_mem(&driver, i, &inst, sess_params) {
            Ok(mem) => {
                *inst.mem.lock().unwrap() = Some(Arc::new(mem));
                inst.mem_setup.store(true, Ordering::Release);
            }
            Err(rc) => {
                // Partial allocations were dropped (and unregistered) on
                // the way out; report per the backup setting.
                return match rc {
                    Status::LowMem if !sw_backup => Status::NoswLowMem,
                    Status::NoInstAttach if !sw_backup => Status::NoswNoInstAttach,
                    other => other,
                };
            }
        }
    }

    if !inst.sess_setup.load(Ordering::Acquire) {
        log::debug!("starting accelerator session on instance {i}");
        let cfg = DcSessionCfg {
            comp_lvl: sess_params.comp_lvl,
            huffman: sess_params.huffman_hdr,
            direction: sess_params.direction,
            window_size: 7,
            checksum_crc32: true,
        };
        let on_complete: CompletionFn = Arc::new(dispatch_completion);
        if let Err(e) = driver.init_session(i, &cfg, on_complete) {
            log::error!("accelerator session init on instance {i} failed: {e}");
            return Status::Fail;
        }
        inst.sess_setup.store(true, Ordering::Release);
    }

    Status::Ok
}

/// Allocate the intermediate, source and destination rings for one
/// instance. Everything allocated so far unwinds on failure.
fn alloc_instance_mem(
    driver: &Arc<dyn AccelDriver>,
    i: u16,
    inst: &Instance,
    sess_params: &SessionParams,
) -> Result<InstanceMem, Status> {
    let node = inst.info.node_id;
    let src_sz = sess_params.hw_buff_sz as usize;
    let inter_sz = params::inter_sz(sess_params.hw_buff_sz);
    let dest_sz = params::dma_dest_sz(sess_params.hw_buff_sz);

    let inter_cnt = driver.intermediate_buffer_count(i) as usize;
    let mut intermediate = Vec::with_capacity(inter_cnt);
    for _ in 0..inter_cnt {
        intermediate.push(dma::alloc(inter_sz, node).ok_or(Status::LowMem)?);
    }

    let mut slots = Vec::with_capacity(RING_DEPTH);
    for _ in 0..RING_DEPTH {
        let src = dma::alloc(src_sz, node).ok_or(Status::LowMem)?;
        let dest = dma::alloc(dest_sz, node).ok_or(Status::LowMem)?;
        slots.push(Slot::new(src, dest));
    }

    let refs: Vec<_> = intermediate.iter().map(DmaBuffer::dma_ref).collect();
    driver.start_instance(i, &refs).map_err(|e| {
        log::error!("starting instance {i} failed: {e}");
        Status::NoInstAttach
    })?;

    Ok(InstanceMem {
        slots,
        intermediate,
    })
}

// ---------------------------------------------------------------------------
// Completion dispatch
// ---------------------------------------------------------------------------

/// Resolve a completion tag to its slot and advance the handshake. Runs on
/// the driver's polling context.
fn dispatch_completion(tag: u64, status: DcJobStatus, results: DcResults) {
    let i = (tag >> 16) as u16;
    let j = (tag & 0xffff) as usize;

    let Some(inst) = instance(i) else {
        log::error!("completion for unknown instance {i}");
        return;
    };
    let Some(mem) = inst.mem() else {
        log::error!("completion for instance {i} with no rings");
        return;
    };
    match mem.slots.get(j) {
        Some(slot) => {
            if !slot.complete(status, results) {
                log::error!("flow error in completion callback: inst {i} slot {j}");
            }
        }
        None => log::error!("completion for unknown slot {j} on instance {i}"),
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Snapshot of one instance for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub node_id: u32,
    pub package_id: u32,
    pub busy: bool,
    pub mem_setup: bool,
}

/// Snapshot of the pool for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub initialized: bool,
    pub status: Status,
    pub sw_backup: bool,
    pub instances: Vec<InstanceReport>,
}

/// Current pool state as structured data.
pub fn report() -> PoolReport {
    let (initialized, status, sw_backup) = {
        let state = STATE.lock().unwrap();
        (state.init_called, state.status, state.sw_backup)
    };
    let instances = INSTANCES
        .read()
        .unwrap()
        .iter()
        .map(|inst| InstanceReport {
            node_id: inst.info.node_id,
            package_id: inst.info.package_id,
            busy: inst.lock.load(Ordering::Acquire),
            mem_setup: inst.mem_setup.load(Ordering::Acquire),
        })
        .collect();
    PoolReport {
        initialized,
        status,
        sw_backup,
        instances,
    }
}

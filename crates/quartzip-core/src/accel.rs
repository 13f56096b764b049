//! The accelerator driver seam.
//!
//! The pool talks to the device through [`AccelDriver`]; the concrete
//! binding (or a simulator in tests) is installed process-wide with
//! [`install_driver`] before the first `init`. Nothing installed means no
//! hardware: `init` backs out into NO_HW / NOSW_NO_HW and every call runs
//! through the software codec.

use std::sync::{Arc, OnceLock};

use crate::dma::DmaRef;
use crate::params::{Direction, HuffmanHdr};

/// Process address-space tag when the build owns its devices.
pub const DEV_TAG: &str = "QATZIP";
/// Tags round-robined across processes when devices are shared.
pub const SHARED_DEV_TAGS: [&str; 3] = ["QATZIP0", "QATZIP1", "QATZIP2"];

/// One request handed to the device.
#[derive(Debug, Clone, Copy)]
pub struct DcRequest {
    /// Completion tag: `(instance << 16) | slot`.
    pub tag: u64,
    pub op: DcOp,
    /// Input region; its length is the request length.
    pub src: DmaRef,
    /// Output region; its length is the output budget.
    pub dst: DmaRef,
    /// Stateless requests always flush to a final block boundary.
    pub flush_final: bool,
}

/// Request direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcOp {
    Compress,
    Decompress,
}

/// What the device reported for one completed request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcResults {
    /// Input bytes consumed.
    pub consumed: u32,
    /// Output bytes produced.
    pub produced: u32,
    /// CRC32 of the uncompressed side of the request.
    pub checksum: u32,
}

/// Completion status delivered through the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcJobStatus {
    Ok,
    Fail,
}

impl Default for DcJobStatus {
    fn default() -> Self {
        DcJobStatus::Fail
    }
}

/// Outcome of a submit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Accepted; a completion will follow.
    Ok,
    /// Device queue full; back off and resubmit.
    Retry,
    /// Rejected for good.
    Fail,
}

/// Accelerator session configuration, fixed for the life of an instance.
#[derive(Debug, Clone, Copy)]
pub struct DcSessionCfg {
    pub comp_lvl: u32,
    pub huffman: HuffmanHdr,
    pub direction: Direction,
    /// DEFLATE window size selector; 7 selects the full 32 KiB window.
    pub window_size: u8,
    /// The engine computes CRC32 checksums alongside each request.
    pub checksum_crc32: bool,
}

/// Topology of one discovered instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceInfo {
    /// NUMA node the instance's queues live on.
    pub node_id: u32,
    /// Physical package the instance belongs to.
    pub package_id: u32,
}

/// Driver-level error. Carries the binding's own diagnostic text.
#[derive(Debug)]
pub struct DriverError(pub String);

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "driver error: {}", self.0)
    }
}

impl std::error::Error for DriverError {}

/// Invoked by the driver once per completed request, on the driver's
/// polling context. Arguments: tag, job status, results.
pub type CompletionFn = Arc<dyn Fn(u64, DcJobStatus, DcResults) + Send + Sync>;

/// The device binding the pool drives.
///
/// Implementations must tolerate concurrent `submit` and `poll` on the
/// same instance from two threads: that is exactly what a paired
/// submit/drain call does.
pub trait AccelDriver: Send + Sync {
    /// Start the driver in multi-process mode under `tag` and discover
    /// instances. Called once per successful pool init.
    fn start(&self, tag: &str) -> Result<Vec<InstanceInfo>, DriverError>;

    /// How many intermediate scratch buffers instance `inst` wants.
    fn intermediate_buffer_count(&self, inst: u16) -> u16;

    /// Hand the instance its scratch buffers and start it.
    fn start_instance(&self, inst: u16, intermediate: &[DmaRef]) -> Result<(), DriverError>;

    /// Create the compression session on `inst`; completions for its
    /// requests are delivered through `on_complete`.
    fn init_session(
        &self,
        inst: u16,
        cfg: &DcSessionCfg,
        on_complete: CompletionFn,
    ) -> Result<(), DriverError>;

    /// Queue one request. Asynchronous: OK means a completion will follow.
    fn submit(&self, inst: u16, req: &DcRequest) -> SubmitStatus;

    /// Process responses for `inst`, invoking the completion callback for
    /// each. Returns how many completions were dispatched.
    fn poll(&self, inst: u16) -> Result<usize, DriverError>;

    /// Stop one instance.
    fn stop_instance(&self, inst: u16);

    /// Tear the driver down. Called from the pool's exit hook or `close`.
    fn shutdown(&self);

    /// Whether devices are shared across processes (selects the tag set).
    fn shared_devices(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Process-wide installation
// ---------------------------------------------------------------------------

static DRIVER: OnceLock<Arc<dyn AccelDriver>> = OnceLock::new();

/// Install the device binding for this process.
///
/// Must happen before the first successful `init`; at most one driver per
/// process. Returns false if one was already installed.
pub fn install_driver(driver: Arc<dyn AccelDriver>) -> bool {
    DRIVER.set(driver).is_ok()
}

/// The installed binding, if any.
pub(crate) fn installed_driver() -> Option<Arc<dyn AccelDriver>> {
    DRIVER.get().cloned()
}

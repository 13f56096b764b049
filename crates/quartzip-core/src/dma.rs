//! Pinned-buffer allocation and the process-wide region registry.
//!
//! The accelerator addresses memory directly, so every buffer handed to it
//! must come from this allocator. The registry doubles as the zero-copy
//! probe: if a caller's buffer was allocated here, the pipeline passes its
//! address straight to the device instead of bouncing through the ring.
//!
//! Real NUMA placement belongs to the platform allocator this module
//! fronts; the node preference is recorded and forwarded, nothing more.

use std::collections::BTreeMap;
use std::sync::{LazyLock, Mutex};

// Registry of pinned regions: base address -> length.
static REGISTRY: LazyLock<Mutex<BTreeMap<usize, usize>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

// ---------------------------------------------------------------------------
// DmaBuffer
// ---------------------------------------------------------------------------

/// A pinned, registered buffer with a stable address.
///
/// The backing storage never moves for the lifetime of the buffer, so a
/// [`DmaRef`] taken from it stays valid until the buffer is dropped.
pub struct DmaBuffer {
    data: Box<[u8]>,
    node: u32,
}

impl DmaBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// NUMA node this buffer was allocated for.
    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Device-side handle covering the whole buffer.
    pub fn dma_ref(&self) -> DmaRef {
        DmaRef {
            addr: self.data.as_ptr() as usize,
            len: self.data.len(),
        }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        REGISTRY
            .lock()
            .unwrap()
            .remove(&(self.data.as_ptr() as usize));
    }
}

/// Allocate a zeroed pinned buffer, preferring the given NUMA node.
///
/// Returns `None` when the allocation cannot be satisfied; callers map
/// that to LOW_MEM and unwind whatever they allocated so far.
pub fn alloc(len: usize, node: u32) -> Option<DmaBuffer> {
    if len == 0 {
        return None;
    }
    let data = vec![0u8; len].into_boxed_slice();
    REGISTRY.lock().unwrap().insert(data.as_ptr() as usize, len);
    Some(DmaBuffer { data, node })
}

/// Whether `ptr` falls inside a registered pinned region.
///
/// Probed once per call on the caller's base pointers, exactly like the
/// submit loops do: zero-copy is all-or-nothing per buffer.
pub fn find_addr(ptr: *const u8) -> bool {
    let p = ptr as usize;
    let registry = REGISTRY.lock().unwrap();
    registry
        .range(..=p)
        .next_back()
        .is_some_and(|(&base, &len)| p < base + len)
}

// ---------------------------------------------------------------------------
// DmaRef
// ---------------------------------------------------------------------------

/// A raw device-visible region: base address and length.
///
/// This is the handle crossing the driver boundary. Safety contract, upheld
/// by the slot handshake: between submit (`src2` increment) and completion
/// (`sink1` increment) the device is the only party touching the region;
/// outside that window only the owning thread does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRef {
    addr: usize,
    len: usize,
}

unsafe impl Send for DmaRef {}
unsafe impl Sync for DmaRef {}

impl DmaRef {
    /// A reference into caller-owned pinned memory.
    pub fn from_raw(ptr: *const u8, len: usize) -> Self {
        Self {
            addr: ptr as usize,
            len,
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Narrow the region to `len` bytes starting at `off`.
    pub fn slice(&self, off: usize, len: usize) -> DmaRef {
        debug_assert!(off + len <= self.len);
        DmaRef {
            addr: self.addr + off,
            len,
        }
    }

    /// View the region as a byte slice.
    ///
    /// # Safety
    ///
    /// The region must be live and not concurrently written; see the type
    /// docs for the handshake window that guarantees it.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.len) }
    }

    /// View the region as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The region must be live and exclusively held by the caller for the
    /// duration of the borrow; see the type docs.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.addr as *mut u8, self.len) }
    }
}

// ---------------------------------------------------------------------------
// PinnedBuffer
// ---------------------------------------------------------------------------

/// A caller-facing pinned buffer for zero-copy I/O.
///
/// Compress or decompress into one of these and the pipeline hands its
/// address to the device instead of copying through the instance ring.
pub struct PinnedBuffer(DmaBuffer);

impl PinnedBuffer {
    /// Allocate a zeroed pinned buffer of `len` bytes on any node.
    ///
    /// Returns `None` if the pinned allocator cannot satisfy the request.
    pub fn new(len: usize) -> Option<Self> {
        alloc(len, 0).map(Self)
    }
}

impl std::ops::Deref for PinnedBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::ops::DerefMut for PinnedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.0.as_mut_slice()
    }
}

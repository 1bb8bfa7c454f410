//! Host storage for runtime tensors.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

/// Alignment of every host allocation made by the runtime.
pub const HOST_ALIGNMENT: usize = 64;

/// Zero-initialised heap allocation aligned to [`HOST_ALIGNMENT`].
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: AlignedBuffer uniquely owns its allocation; access goes through &/&mut.
unsafe impl Send for AlignedBuffer {}
// SAFETY: Shared references only hand out immutable byte slices.
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    pub fn zeroed(len: usize) -> Self {
        // Zero-length buffers still get a real aligned allocation so typed views
        // of empty tensors see an aligned pointer.
        let layout = match Layout::from_size_align(len.max(HOST_ALIGNMENT), HOST_ALIGNMENT) {
            Ok(layout) => layout,
            Err(_) => panic!("host allocation of {len} bytes exceeds the address space"),
        };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        AlignedBuffer { ptr, len, layout }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_mut_slice().copy_from_slice(bytes);
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialised bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: unique borrow of self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with the same layout and freed once.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .finish()
    }
}

/// Caller-owned memory a tensor may be bound to without taking ownership.
pub struct ExternalBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the creator of an ExternalBuffer vouches for cross-thread validity.
unsafe impl Send for ExternalBuffer {}
// SAFETY: as above.
unsafe impl Sync for ExternalBuffer {}

impl ExternalBuffer {
    /// Wraps `len` bytes at `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as the
    /// buffer (and any tensor bound to it) is alive, and must not be accessed
    /// through other aliases while a tensor bound to it is being written.
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| ExternalBuffer { ptr, len })
    }

    /// Wraps a mutable slice.
    ///
    /// # Safety
    ///
    /// The slice must outlive every tensor bound to the returned buffer.
    pub unsafe fn from_slice(bytes: &mut [u8]) -> Self {
        ExternalBuffer {
            len: bytes.len(),
            ptr: NonNull::from(bytes).cast::<u8>(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: validity guaranteed by the constructor contract.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: validity and exclusivity guaranteed by the constructor contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

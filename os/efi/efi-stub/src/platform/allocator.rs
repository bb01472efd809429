use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};
use uefi::boot::{self, MemoryType};

/// Size of the back pointer stored in front of every block.
const TAG: usize = size_of::<*mut u8>();

static RETIRED: AtomicBool = AtomicBool::new(false);

/// Heap for the stub's own bookkeeping (tree edits, the release stack),
/// carved from the firmware pool as `LOADER_DATA`.
///
/// Pool memory is only 8-byte aligned, so each block is padded and the
/// pool pointer is kept just in front of the aligned block. Once boot
/// services are gone every request fails and frees are dropped.
pub struct PoolAllocator;

#[global_allocator]
static HEAP: PoolAllocator = PoolAllocator;

/// Stop using the pool; called once `ExitBootServices` succeeded.
pub(super) fn retire() {
    RETIRED.store(true, Ordering::Release);
}

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if RETIRED.load(Ordering::Acquire) {
            return ptr::null_mut();
        }
        let align = layout.align().max(TAG);
        let Some(total) = layout.size().max(1).checked_add(align + TAG) else {
            return ptr::null_mut();
        };
        let Ok(pool) = boot::allocate_pool(MemoryType::LOADER_DATA, total) else {
            return ptr::null_mut();
        };

        let pool = pool.as_ptr();
        // SAFETY: the pool block holds `align + TAG` bytes of slack, enough
        // to skip the tag and reach the next `align` boundary.
        unsafe {
            let first = pool.add(TAG);
            let block = first.add(first.align_offset(align));
            block.sub(TAG).cast::<*mut u8>().write_unaligned(pool);
            block
        }
    }

    unsafe fn dealloc(&self, block: *mut u8, _layout: Layout) {
        if block.is_null() || RETIRED.load(Ordering::Acquire) {
            return;
        }
        // SAFETY: `alloc` wrote the pool pointer right in front of `block`.
        let pool = unsafe { block.sub(TAG).cast::<*mut u8>().read_unaligned() };
        if let Some(pool) = NonNull::new(pool) {
            // SAFETY: `pool` came from `allocate_pool` and is freed once.
            let _ = unsafe { boot::free_pool(pool) };
        }
    }
}

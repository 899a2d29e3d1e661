use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::Device;

use super::pool::{DescriptorPool, POOL_CAPACITY};
use super::{DescriptorFlags, DescriptorHandle, DescriptorKind};

/// Fixed-capacity descriptor allocator.
///
/// Descriptors live in pools of [`POOL_CAPACITY`] slots partitioned by
/// `(kind, flags)`. Allocation is first-fit over existing pools; a new pool is
/// created only when no existing one has room. Pools are never destroyed
/// individually, only by [`HandleAllocator::teardown`] or drop.
///
/// All operations serialize on one mutex. Allocation is expected at resource
/// (re)creation time, not every frame.
pub struct HandleAllocator<D: Device> {
    device: Arc<D>,
    pools: Mutex<Vec<DescriptorPool<D::Block>>>,
}

impl<D: Device> HandleAllocator<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Reserves `n` contiguous descriptors of `kind`.
    ///
    /// Returns [`DescriptorHandle::NULL`] for `n == 0`, for runs larger than a
    /// pool, and when a new pool is needed but cannot be created.
    pub fn allocate(&self, kind: DescriptorKind, n: u32, flags: DescriptorFlags) -> DescriptorHandle {
        if n == 0 {
            return DescriptorHandle::NULL;
        }
        if n > POOL_CAPACITY {
            log::error!("descriptor run of {n} exceeds pool capacity {POOL_CAPACITY} ({kind:?})");
            return DescriptorHandle::NULL;
        }

        let mut pools = self.pools.lock();

        for pool in pools.iter_mut().filter(|p| p.matches(kind, flags)) {
            if let Some(start) = pool.free.find_run(n) {
                pool.free.reserve(start, n);
                return pool.handle_at(start);
            }
        }

        let block = match self.device.create_descriptor_block(kind, flags, POOL_CAPACITY) {
            Ok(block) => block,
            Err(e) => {
                log::error!("failed to create descriptor pool ({kind:?}, {flags:?}): {e}");
                return DescriptorHandle::NULL;
            }
        };
        debug_assert_ne!(block.start, 0, "descriptor block placed at the null address");

        let stride = self.device.descriptor_stride(kind);
        let mut pool = DescriptorPool::new(kind, flags, block.start, stride, block.raw);
        pool.free.reserve(0, n);
        let handle = pool.handle_at(0);

        log::debug!(
            "new descriptor pool #{} ({kind:?}, {flags:?}) at {:#x}",
            pools.len(),
            pool.start
        );
        pools.push(pool);

        handle
    }

    /// Like [`allocate`](Self::allocate) but returns a guard that releases the
    /// run when dropped.
    pub fn allocate_scoped(
        self: &Arc<Self>,
        kind: DescriptorKind,
        n: u32,
        flags: DescriptorFlags,
    ) -> Option<DescriptorRange<D>> {
        let handle = self.allocate(kind, n, flags);
        if handle.is_null() {
            return None;
        }
        Some(DescriptorRange {
            allocator: Arc::clone(self),
            kind,
            handle,
            count: n,
        })
    }

    /// Returns `n` descriptors starting at `handle` to their pool.
    ///
    /// Releasing a run that lies in no tracked pool is logged and ignored.
    pub fn release(&self, handle: DescriptorHandle, n: u32) {
        if n == 0 {
            return;
        }

        let mut pools = self.pools.lock();
        for pool in pools.iter_mut() {
            if let Some(start) = pool.position_of(handle, n) {
                pool.free.free(start, n);
                return;
            }
        }

        log::warn!("releasing untracked descriptor handle {:#x} (n = {n})", handle.raw());
    }

    /// Address increment between consecutive descriptors of `kind`.
    pub fn stride(&self, kind: DescriptorKind) -> u64 {
        self.device.descriptor_stride(kind)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Total free slots over all pools of `(kind, flags)`.
    pub fn free_slots(&self, kind: DescriptorKind, flags: DescriptorFlags) -> u32 {
        self.pools
            .lock()
            .iter()
            .filter(|p| p.matches(kind, flags))
            .map(|p| p.free.free_count())
            .sum()
    }

    /// Runs `f` with the device block backing `handle` and the byte offset of
    /// the handle inside it.
    pub fn with_block<R>(&self, handle: DescriptorHandle, f: impl FnOnce(&D::Block, u64) -> R) -> Option<R> {
        let pools = self.pools.lock();
        let pool = pools.iter().find(|p| p.position_of(handle, 1).is_some())?;
        Some(f(&pool.block, handle.raw() - pool.start))
    }

    /// Drops every pool. Outstanding handles become untracked.
    pub fn teardown(&self) {
        let mut pools = self.pools.lock();
        if !pools.is_empty() {
            log::debug!("releasing {} descriptor pool(s)", pools.len());
        }
        pools.clear();
    }
}

/// Scoped descriptor run; released back to its allocator on drop.
pub struct DescriptorRange<D: Device> {
    allocator: Arc<HandleAllocator<D>>,
    kind: DescriptorKind,
    handle: DescriptorHandle,
    count: u32,
}

impl<D: Device> DescriptorRange<D> {
    #[inline]
    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    /// Handle of the `index`-th descriptor in this run.
    pub fn at(&self, index: u32) -> DescriptorHandle {
        debug_assert!(index < self.count);
        self.handle.offset(index, self.allocator.stride(self.kind))
    }
}

impl<D: Device> Drop for DescriptorRange<D> {
    fn drop(&mut self) {
        self.allocator.release(self.handle, self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{HeadlessConfig, HeadlessDevice};
    use std::collections::HashSet;

    fn allocator() -> (Arc<HeadlessDevice>, Arc<HandleAllocator<HeadlessDevice>>) {
        let device = Arc::new(HeadlessDevice::new(HeadlessConfig::default()));
        let alloc = Arc::new(HandleAllocator::new(Arc::clone(&device)));
        (device, alloc)
    }

    fn slots(alloc: &HandleAllocator<HeadlessDevice>, h: DescriptorHandle, n: u32) -> Vec<u64> {
        let stride = alloc.stride(DescriptorKind::Resource);
        (0..n).map(|i| h.offset(i, stride).raw()).collect()
    }

    /// Small deterministic xorshift; enough to shuffle run lengths.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn zero_length_allocation_is_null() {
        let (_, alloc) = allocator();
        assert!(alloc.allocate(DescriptorKind::Resource, 0, DescriptorFlags::NONE).is_null());
        assert_eq!(alloc.pool_count(), 0);
    }

    #[test]
    fn oversized_allocation_is_null() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Resource, POOL_CAPACITY + 1, DescriptorFlags::NONE);
        assert!(h.is_null());
        assert_eq!(alloc.pool_count(), 0);
    }

    #[test]
    fn randomized_live_allocations_never_overlap() {
        let (_, alloc) = allocator();
        let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
        let mut live: Vec<(DescriptorHandle, u32)> = Vec::new();
        let mut taken: HashSet<u64> = HashSet::new();

        for _ in 0..2_000 {
            let release = !live.is_empty() && rng.next() % 3 == 0;
            if release {
                let idx = (rng.next() as usize) % live.len();
                let (h, n) = live.swap_remove(idx);
                for s in slots(&alloc, h, n) {
                    assert!(taken.remove(&s));
                }
                alloc.release(h, n);
            } else {
                let n = 1 + (rng.next() % 24) as u32;
                let h = alloc.allocate(DescriptorKind::Resource, n, DescriptorFlags::NONE);
                assert!(!h.is_null());
                for s in slots(&alloc, h, n) {
                    assert!(taken.insert(s), "slot {s:#x} handed out twice");
                }
                live.push((h, n));
            }
        }
    }

    #[test]
    fn release_then_reallocate_reuses_the_pool() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Sampler, 4, DescriptorFlags::NONE);
        alloc.release(h, 4);
        let again = alloc.allocate(DescriptorKind::Sampler, 4, DescriptorFlags::NONE);
        assert_eq!(again, h);
        assert_eq!(alloc.pool_count(), 1);
    }

    #[test]
    fn full_pool_of_singles_releases_into_one_contiguous_run() {
        let (_, alloc) = allocator();
        let singles: Vec<_> = (0..POOL_CAPACITY)
            .map(|_| alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE))
            .collect();
        assert_eq!(alloc.pool_count(), 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), 0);

        for h in &singles {
            alloc.release(*h, 1);
        }

        let whole = alloc.allocate(DescriptorKind::Resource, POOL_CAPACITY, DescriptorFlags::NONE);
        assert_eq!(whole, singles[0]);
        assert_eq!(alloc.pool_count(), 1);
    }

    #[test]
    fn exhausted_pool_grows_a_second_one() {
        let (_, alloc) = allocator();
        let a = alloc.allocate(DescriptorKind::Resource, POOL_CAPACITY - 1, DescriptorFlags::NONE);
        let b = alloc.allocate(DescriptorKind::Resource, 2, DescriptorFlags::NONE);
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(alloc.pool_count(), 2);
        // The tail slot of the first pool is still free for a single.
        let c = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        assert_eq!(c, a.offset(POOL_CAPACITY - 1, alloc.stride(DescriptorKind::Resource)));
    }

    #[test]
    fn kinds_and_flags_use_separate_pools() {
        let (_, alloc) = allocator();
        alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::SHADER_VISIBLE);
        alloc.allocate(DescriptorKind::RenderTarget, 1, DescriptorFlags::NONE);
        assert_eq!(alloc.pool_count(), 3);
    }

    #[test]
    fn pool_creation_failure_returns_null() {
        let (device, alloc) = allocator();
        device.fail_descriptor_blocks(true);
        assert!(alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE).is_null());
        device.fail_descriptor_blocks(false);
        assert!(!alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE).is_null());
    }

    #[test]
    fn untracked_release_is_ignored() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        alloc.release(DescriptorHandle::from_raw(0xdead_0000), 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY - 1);
        alloc.release(h, 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY);
    }

    #[test]
    fn release_near_the_end_of_the_address_space_is_ignored() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        alloc.release(DescriptorHandle::from_raw(u64::MAX - 4), 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY - 1);
        alloc.release(h, 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY);
    }

    #[test]
    fn misaligned_release_keeps_live_slots() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        alloc.release(DescriptorHandle::from_raw(h.raw() + 1), 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY - 1);

        // The slot is still owned by `h`: the next allocation lands elsewhere.
        let next = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        assert_ne!(next, h);
        alloc.release(h, 1);
        alloc.release(next, 1);
        assert_eq!(alloc.free_slots(DescriptorKind::Resource, DescriptorFlags::NONE), POOL_CAPACITY);
    }

    #[test]
    fn scoped_range_releases_on_drop() {
        let (_, alloc) = allocator();
        {
            let range = alloc
                .allocate_scoped(DescriptorKind::RenderTarget, 3, DescriptorFlags::NONE)
                .unwrap();
            assert_eq!(range.count(), 3);
            assert_eq!(range.at(2), range.handle().offset(2, alloc.stride(DescriptorKind::RenderTarget)));
            assert_eq!(alloc.free_slots(DescriptorKind::RenderTarget, DescriptorFlags::NONE), POOL_CAPACITY - 3);
        }
        assert_eq!(alloc.free_slots(DescriptorKind::RenderTarget, DescriptorFlags::NONE), POOL_CAPACITY);
    }

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let (_, alloc) = allocator();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| alloc.allocate(DescriptorKind::Resource, 2, DescriptorFlags::NONE))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for handle in h.join().unwrap() {
                for s in slots(&alloc, handle, 2) {
                    assert!(seen.insert(s));
                }
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn teardown_drops_pools_and_untracks_handles() {
        let (_, alloc) = allocator();
        let h = alloc.allocate(DescriptorKind::Resource, 1, DescriptorFlags::NONE);
        alloc.teardown();
        assert_eq!(alloc.pool_count(), 0);
        alloc.release(h, 1);
        assert_eq!(alloc.pool_count(), 0);
    }
}

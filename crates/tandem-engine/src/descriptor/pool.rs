use super::{DescriptorFlags, DescriptorHandle, DescriptorKind};

pub const BUCKETS_PER_POOL: usize = 8;
pub const DESCRIPTORS_PER_BUCKET: u32 = 32;
pub const POOL_CAPACITY: u32 = BUCKETS_PER_POOL as u32 * DESCRIPTORS_PER_BUCKET;

/// Free-slot bitmap of one pool. A set bit marks a free slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct FreeMap {
    buckets: [u32; BUCKETS_PER_POOL],
}

#[inline]
fn split(pos: u32) -> (usize, u32) {
    ((pos / DESCRIPTORS_PER_BUCKET) as usize, pos % DESCRIPTORS_PER_BUCKET)
}

impl FreeMap {
    pub fn all_free() -> Self {
        Self {
            buckets: [u32::MAX; BUCKETS_PER_POOL],
        }
    }

    #[inline]
    pub fn is_free(&self, pos: u32) -> bool {
        let (bucket, bit) = split(pos);
        self.buckets[bucket] & (1 << bit) != 0
    }

    /// First-fit search for `n` contiguous free slots.
    ///
    /// Candidate starts come from the lowest set bit of a working copy of each
    /// bucket; a rejected candidate is cleared from the copy and the bucket is
    /// rescanned. The real bitmap is not touched.
    pub fn find_run(&self, n: u32) -> Option<u32> {
        if n == 0 || n > POOL_CAPACITY {
            return None;
        }

        for (bucket, &bits) in self.buckets.iter().enumerate() {
            let mut map = bits;
            while map != 0 {
                let bit = map.trailing_zeros();
                let start = bucket as u32 * DESCRIPTORS_PER_BUCKET + bit;

                // Candidates only move forward, so nothing later fits either.
                if start + n > POOL_CAPACITY {
                    return None;
                }

                if (start + 1..start + n).all(|pos| self.is_free(pos)) {
                    return Some(start);
                }

                map &= !(1 << bit);
            }
        }

        None
    }

    pub fn reserve(&mut self, start: u32, n: u32) {
        for pos in start..start + n {
            let (bucket, bit) = split(pos);
            debug_assert!(self.buckets[bucket] & (1 << bit) != 0, "slot {pos} already taken");
            self.buckets[bucket] &= !(1 << bit);
        }
    }

    pub fn free(&mut self, start: u32, n: u32) {
        for pos in start..start + n {
            let (bucket, bit) = split(pos);
            self.buckets[bucket] |= 1 << bit;
        }
    }

    pub fn free_count(&self) -> u32 {
        self.buckets.iter().map(|b| b.count_ones()).sum()
    }
}

/// One fixed-capacity descriptor block and its bitmap.
pub(crate) struct DescriptorPool<B> {
    pub kind: DescriptorKind,
    pub flags: DescriptorFlags,
    pub start: u64,
    pub stride: u64,
    pub free: FreeMap,
    pub block: B,
}

impl<B> DescriptorPool<B> {
    pub fn new(kind: DescriptorKind, flags: DescriptorFlags, start: u64, stride: u64, block: B) -> Self {
        Self {
            kind,
            flags,
            start,
            stride,
            free: FreeMap::all_free(),
            block,
        }
    }

    #[inline]
    pub fn matches(&self, kind: DescriptorKind, flags: DescriptorFlags) -> bool {
        self.kind == kind && self.flags == flags
    }

    #[inline]
    pub fn handle_at(&self, pos: u32) -> DescriptorHandle {
        DescriptorHandle::from_raw(self.start + pos as u64 * self.stride)
    }

    /// Returns the slot index of `handle` if the run `[handle, handle + n)` lies
    /// entirely inside this pool and `handle` sits on a descriptor boundary.
    pub fn position_of(&self, handle: DescriptorHandle, n: u32) -> Option<u32> {
        let addr = handle.raw();
        let end = self.start + POOL_CAPACITY as u64 * self.stride;
        let run_end = (n as u64)
            .checked_mul(self.stride)
            .and_then(|len| addr.checked_add(len))?;
        if addr < self.start || run_end > end {
            return None;
        }
        let offset = addr - self.start;
        if offset % self.stride != 0 {
            return None;
        }
        Some((offset / self.stride) as u32)
    }
}

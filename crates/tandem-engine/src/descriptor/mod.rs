//! Descriptor handle allocation.
//!
//! GPU-visible descriptors are handed out from fixed-capacity pools tracked by
//! a bitmap free-list:
//! - a pool holds 256 descriptors (8 buckets of 32 bits, bit set = free)
//! - runs of `n` descriptors are contiguous inside one pool
//! - pools are partitioned by `(kind, flags)` and created lazily

mod allocator;
mod handle;
mod pool;

pub use allocator::{DescriptorRange, HandleAllocator};
pub use handle::{DescriptorFlags, DescriptorHandle, DescriptorKind};
pub use pool::{BUCKETS_PER_POOL, DESCRIPTORS_PER_BUCKET, POOL_CAPACITY};

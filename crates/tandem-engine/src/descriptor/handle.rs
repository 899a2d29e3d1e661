/// Class of descriptor stored in a pool.
///
/// Pools never mix kinds: a handle of one kind is never served from a pool of
/// another, even when both have free room.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorKind {
    /// Buffer / texture views read or written by shaders.
    Resource,
    Sampler,
    /// Color attachments (one per swap-ring image).
    RenderTarget,
    DepthStencil,
}

/// Pool creation flags. Part of the pool partition key together with the kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct DescriptorFlags(u32);

impl DescriptorFlags {
    pub const NONE: Self = Self(0);
    pub const SHADER_VISIBLE: Self = Self(1 << 0);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Opaque address of the first descriptor of a run.
///
/// The zero address is reserved as the null handle; devices never place a
/// descriptor block at address zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct DescriptorHandle(u64);

impl DescriptorHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Handle of the `index`-th descriptor of the run starting at `self`.
    #[inline]
    pub const fn offset(self, index: u32, stride: u64) -> Self {
        Self(self.0 + index as u64 * stride)
    }
}

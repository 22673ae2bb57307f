use std::fmt;

/// Requests served by the linear strategies are rounded up
/// to a multiple of this many bytes.
pub const ALIGNMENT: u64 = 8;

/// Size of an order 0 block in the buddy allocator.
pub const MIN_BLOCK_SIZE: u64 = 8;

/// Identifier handed out on a successful allocation. Each
/// engine mints its own identifiers, starting at 1, and never
/// reuses one until it is initialized again.
pub type AllocationId = u64;

/// Result of a successful allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Identifier to pass back to `free`.
    pub id: AllocationId,
    /// Start address of the block within the address space.
    pub address: u64,
    /// Size of the block actually reserved, after rounding.
    pub size: u64,
}

/// Read-only view of a block of the linear allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockView {
    /// Offset of the block within the address space.
    pub start: u64,
    /// Size of the block in bytes.
    pub size: u64,
    /// Identifier of the allocation that owns the block, or
    /// `None` if the block is free.
    pub owner: Option<AllocationId>,
}

impl BlockView {
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// One past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

impl fmt::Display for BlockView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ranges are printed inclusive, so the last byte is
        // end - 1. A zero-sized block never exists in the
        // list, but saturate anyway to stay in range.
        write!(
            f,
            "[0x{:04x} - 0x{:04x}] ",
            self.start,
            self.end().saturating_sub(1),
        )?;

        match self.owner {
            None => write!(f, "FREE"),
            Some(id) => write!(f, "USED (id={id})"),
        }
    }
}

pub fn align_down(value: u64, alignment: u64) -> u64 {
    // Align a value down to another value (the alignment): let
    // us take for example V = 0x2F and an alignment A = 0x08.
    // We have:
    //
    //  A = 0000 1000
    //  A - 1 = 0000 0111 (set all lower bits)
    //  M = !(A-1) = 1111 1000 (invert to get a mask of the
    //                          higher bits)
    //
    //    V = 0010 1111
    //  & M = 1111 1000
    //  ---------------
    //        0010 1000
    //
    // So align_down(V) = 0x28, the closest multiple of A that
    // is lower than or equal to V.
    value & !(alignment - 1)
}

pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    // Aligning up is aligning down the value shifted by one
    // alignment step (that is, value + alignment - 1). The
    // shift may overflow for absurdly large requests, in
    // which case there is no aligned size at all.
    let shifted = value.checked_add(alignment - 1)?;
    Some(align_down(shifted, alignment))
}

//! Base-plus-offset plumbing shared by every memory transfer executor:
//! indexing and offsetting flags, address resolution, alignment and the
//! page-boundary splitting used for multi-word guest accesses.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

/// Smallest page size the guest translation tables can map.
///
/// Multi-word transfers are only guaranteed physically contiguous within a
/// window of this size, so anything that straddles the boundary is issued
/// as two accesses.
pub const TTBL_MIN_PAGE_SIZE: u32 = 0x1000;

/// Whether a transfer moves data into or out of the guest registers.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum LoadStoreKind {
    Store,
    Load,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        match b {
            false => Self::Store,
            true => Self::Load,
        }
    }
}

/// Transfer size of a single data transfer.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum ReadWriteKind {
    /// 32-bit access.
    Word,
    /// 8-bit access, zero-extended on loads.
    Byte,
}

impl From<bool> for ReadWriteKind {
    fn from(byte: bool) -> Self {
        match byte {
            false => Self::Word,
            true => Self::Byte,
        }
    }
}

/// When the offset is applied relative to the transfer itself.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum Indexing {
    /// Transfer at the base, then apply the offset.
    Post,
    /// Apply the offset, then transfer at the result.
    Pre,
}

impl From<bool> for Indexing {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Post,
            true => Self::Pre,
        }
    }
}

/// Direction the offset moves the base.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum Offsetting {
    Down,
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Down,
            true => Self::Up,
        }
    }
}

impl Offsetting {
    /// Applies `offset` to `base` in this direction.
    #[must_use]
    pub fn apply(self, base: u32, offset: u32) -> u32 {
        match self {
            Self::Down => base.wrapping_sub(offset),
            Self::Up => base.wrapping_add(offset),
        }
    }
}

/// How a base register and an offset combine into a transfer address.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct AddressingMode {
    pub indexing: Indexing,
    pub offsetting: Offsetting,
}

impl AddressingMode {
    /// Decodes the P (bit 24) and U (bit 23) fields every load/store
    /// encoding shares.
    #[must_use]
    pub fn from_instruction(instruction: u32) -> Self {
        Self {
            indexing: Indexing::from(instruction.is_bit_on(24)),
            offsetting: Offsetting::from(instruction.is_bit_on(23)),
        }
    }

    /// Applies `offset` to `base`, yielding the offset address and the
    /// address the transfer itself uses.
    ///
    /// Post-indexed transfers access the unmodified base; the offset
    /// address is what write-back stores into the base register either way.
    #[must_use]
    pub fn resolve(self, base: u32, offset: u32) -> (u32, u32) {
        let offset_address = self.offsetting.apply(base, offset);
        let address = match self.indexing {
            Indexing::Post => base,
            Indexing::Pre => offset_address,
        };
        (offset_address, address)
    }
}

/// Word-aligns an address by clearing its low two bits.
#[must_use]
pub const fn align(address: u32) -> u32 {
    address & !0b11
}

/// Whether an indexed load/store updates its base register. Post-indexed
/// forms always write back; pre-indexed ones only with the W bit set.
#[must_use]
pub fn has_writeback(instruction: u32) -> bool {
    instruction.is_bit_off(24) || instruction.is_bit_on(21)
}

/// First address touched by a block transfer of `length` bytes.
///
/// Ascending transfers walk up from the base and descending ones end below
/// it; indexing decides whether the base address itself is inside the
/// window. The lowest-numbered register always sits at the lowest address.
#[must_use]
pub fn block_transfer_start(
    base: u32,
    length: u32,
    indexing: Indexing,
    offsetting: Offsetting,
) -> u32 {
    let start = match offsetting {
        Offsetting::Up => base,
        Offsetting::Down => base.wrapping_sub(length),
    };
    if (indexing == Indexing::Pre) == (offsetting == Offsetting::Up) {
        start.wrapping_add(4)
    } else {
        start
    }
}

/// Splits a word-multiple transfer at the page boundary it crosses, if any.
///
/// Yields one `(address, length)` chunk when the whole window fits inside a
/// [`TTBL_MIN_PAGE_SIZE`] page, two otherwise.
pub fn page_chunks(address: u32, length: u32) -> impl Iterator<Item = (u32, u32)> {
    let page_of = |addr: u32| addr & !(TTBL_MIN_PAGE_SIZE - 1);
    let crosses = page_of(address) != page_of(address.wrapping_add(length).wrapping_sub(4));

    let (first, second) = if crosses {
        let first_len = TTBL_MIN_PAGE_SIZE - (address & (TTBL_MIN_PAGE_SIZE - 1));
        (
            (address, first_len),
            Some((address.wrapping_add(first_len), length - first_len)),
        )
    } else {
        ((address, length), None)
    };
    std::iter::once(first).chain(second)
}

use std::mem::MaybeUninit;
use std::slice;

use num_integer::Integer;

const WORD_BYTES: usize = size_of::<u64>();
const WORD_BITS: usize = u64::BITS as usize;
const TOP_BIT: u64 = 1 << 63;

/// Packed bit array recording which slots of a pool hold an item. A set bit means occupied.
///
/// Bits are ordered first by byte, then from the most significant bit of each byte to the least
/// significant one. Bit 0 is therefore the high bit of byte 0 and bit 9 is the second-highest bit
/// of byte 1. Every scan in this type walks bits in that order, which fixes the order in which
/// free slots are handed out and in which items are enumerated.
///
/// Internally the bytes are read eight at a time as big-endian words so that the natural bit
/// order of a word (`leading_*` counts) matches the slot order.
#[derive(Debug)]
pub(crate) struct Occupancy<'b> {
    /// Only the bytes that describe slots. Any extra bitmask bytes in the buffer are left zeroed
    /// and never looked at.
    bytes: &'b mut [u8],

    /// Number of slots described. Bits at this index and above are always zero.
    len: usize,
}

impl<'b> Occupancy<'b> {
    /// Takes over `bytes` to describe `len` slots, marking every slot as free.
    ///
    /// The memory is not assumed to be initialized; all of `bytes` is zeroed here.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is too short to hold `len` bits.
    pub(crate) fn new(bytes: &'b mut [MaybeUninit<u8>], len: usize) -> Self {
        for byte in bytes.iter_mut() {
            byte.write(0);
        }

        let byte_count = bytes.len();

        // SAFETY: Every byte was initialized above and `u8` has the same layout as
        // `MaybeUninit<u8>`. We consume the only other reference to the memory here.
        let bytes =
            unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<u8>(), byte_count) };

        let bytes = bytes
            .get_mut(..len.div_ceil(8))
            .expect("bitmask region must have at least one bit per slot");

        Self { bytes, len }
    }

    /// Index of the first free slot, or `None` if every slot is occupied.
    #[must_use]
    pub(crate) fn find_first_free(&self) -> Option<usize> {
        let (base, word) = self.words().find(|(_, word)| *word != u64::MAX)?;

        let index = base.checked_add(word.leading_ones() as usize)?;

        // Bits past the end are zero, so a free bit found there means there is no free slot.
        (index < self.len).then_some(index)
    }

    /// Index of the slot holding the `n`-th occupied bit (counting from zero), or `None` if
    /// fewer than `n + 1` bits are set.
    #[must_use]
    pub(crate) fn rank(&self, n: usize) -> Option<usize> {
        let mut remaining = n;

        for (base, word) in self.words() {
            let ones = word.count_ones() as usize;

            if remaining < ones {
                return base.checked_add(nth_set_bit(word, remaining));
            }

            remaining = remaining
                .checked_sub(ones)
                .expect("guarded by comparison above");
        }

        None
    }

    /// Index of the first occupied slot at or after `from`, or `None` if there is none.
    #[must_use]
    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let (first_word, skip_bits) = from.div_rem(&WORD_BITS);

        self.words()
            .skip(first_word)
            .enumerate()
            .find_map(|(position, (base, word))| {
                // Hide the bits before `from` in the first word we look at.
                let word = if position == 0 {
                    word & (u64::MAX >> skip_bits)
                } else {
                    word
                };

                (word != 0).then(|| {
                    base.checked_add(word.leading_zeros() as usize)
                        .expect("bit index is below the number of slots")
                })
            })
    }

    /// Whether the slot at `index` is occupied. Indexes beyond the end are never occupied.
    #[must_use]
    pub(crate) fn is_set(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }

        let (byte_index, mask) = locate(index);

        self.bytes
            .get(byte_index)
            .is_some_and(|byte| byte & mask != 0)
    }

    /// Marks the slot at `index` as occupied.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds or the slot is already occupied.
    pub(crate) fn set(&mut self, index: usize) {
        let byte = self.byte_mut(index);
        let (_, mask) = locate(index);

        assert!(
            *byte & mask == 0,
            "slot {index} is already marked as occupied"
        );

        *byte |= mask;
    }

    /// Marks the slot at `index` as free.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds or the slot is already free.
    pub(crate) fn clear(&mut self, index: usize) {
        let byte = self.byte_mut(index);
        let (_, mask) = locate(index);

        assert!(*byte & mask != 0, "slot {index} is already marked as free");

        *byte &= !mask;
    }

    /// Number of occupied slots.
    #[must_use]
    pub(crate) fn count_ones(&self) -> usize {
        self.words().map(|(_, word)| word.count_ones() as usize).sum()
    }

    fn byte_mut(&mut self, index: usize) -> &mut u8 {
        assert!(
            index < self.len,
            "slot {index} out of bounds in bitmask of {} slots",
            self.len
        );

        let (byte_index, _) = locate(index);

        self.bytes
            .get_mut(byte_index)
            .expect("guarded by bounds check above")
    }

    /// Yields each 64-bit word of the bitmask with the slot index of its highest bit. The last
    /// word is padded with zero bytes.
    fn words(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.bytes
            .chunks(WORD_BYTES)
            .enumerate()
            .map(|(word_index, chunk)| {
                let mut word = [0_u8; WORD_BYTES];

                for (target, source) in word.iter_mut().zip(chunk) {
                    *target = *source;
                }

                let base = word_index
                    .checked_mul(WORD_BITS)
                    .expect("bit index of a borrowed byte always fits in usize");

                (base, u64::from_be_bytes(word))
            })
    }
}

/// Byte index and single-bit mask for the slot at `index`.
fn locate(index: usize) -> (usize, u8) {
    let (byte_index, bit) = index.div_rem(&8);

    (byte_index, 0x80 >> bit)
}

/// Position (from the most significant bit) of the `n`-th set bit in `word`.
///
/// The caller guarantees that `word` has more than `n` bits set.
fn nth_set_bit(mut word: u64, n: usize) -> usize {
    for _ in 0..n {
        // Drop the highest set bit.
        let highest = TOP_BIT
            .checked_shr(word.leading_zeros())
            .expect("caller guarantees there are more set bits");
        word &= !highest;
    }

    word.leading_zeros() as usize
}

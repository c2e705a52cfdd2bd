use std::alloc::Layout;

use num_integer::Integer;

use crate::{Error, Result};

/// How a [`BufferPool`][crate::BufferPool] divides its buffer between the occupancy bitmask
/// and the item slots.
///
/// The buffer starts with the bitmask (one bit per slot), followed by padding up to the item
/// alignment, followed by `capacity` slots of `element_size` bytes each:
///
/// ```text
/// | bitmask_bytes | padding | slot 0 | slot 1 | ... | slot capacity-1 | unused tail |
/// ^ 0                       ^ slots_offset
/// ```
///
/// The geometry is fixed when the pool is created and never changes afterwards.
///
/// # Examples
///
/// ```
/// use buffer_pool::Geometry;
///
/// let geometry = Geometry::for_type::<[u64; 2]>(2048).unwrap();
///
/// assert_eq!(geometry.bitmask_len(), 128);
/// assert_eq!(geometry.bitmask_bytes(), 16);
/// assert_eq!(geometry.slots_offset(), 16);
/// assert_eq!(geometry.capacity(), 127);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Geometry {
    buffer_size: usize,
    element_size: usize,

    /// How many items would fit if the buffer held nothing but items.
    bitmask_len: usize,

    /// Bytes reserved for the occupancy bitmask at the start of the buffer.
    bitmask_bytes: usize,

    /// Offset of slot 0 from the start of the buffer.
    slots_offset: usize,

    capacity: usize,
}

impl Geometry {
    /// Plans the layout of a buffer of `buffer_size` bytes holding items of `item_layout`.
    ///
    /// The element size is the size of the layout padded to its alignment, so that consecutive
    /// slots stay aligned.
    ///
    /// The nominal plan reserves `bitmask_len / 8` bytes for the bitmask, where `bitmask_len`
    /// is `buffer_size / element_size`, and gives up `bitmask_bytes / element_size` slots to
    /// make room for it. If the nominal plan would leave slots without a bit in the bitmask or
    /// would run past the end of the buffer once slots are aligned, the bitmask is widened
    /// and the capacity reduced until everything fits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroSizedElement`] if the item layout has zero size and
    /// [`Error::BufferTooSmall`] if not even one item fits.
    pub fn plan(buffer_size: usize, item_layout: Layout) -> Result<Self> {
        let item_layout = item_layout.pad_to_align();
        let element_size = item_layout.size();

        if element_size == 0 {
            return Err(Error::ZeroSizedElement);
        }

        let (bitmask_len, _) = buffer_size.div_rem(&element_size);
        let (nominal_bitmask_bytes, _) = bitmask_len.div_rem(&8);
        let (bitmask_slots, _) = nominal_bitmask_bytes.div_rem(&element_size);

        let mut capacity = bitmask_len
            .checked_sub(bitmask_slots)
            .expect("bitmask bytes can never exceed the number of items they describe");

        // Every slot needs its own bit and every slot must end inside the buffer.
        let (bitmask_bytes, slots_offset) = loop {
            let bitmask_bytes = nominal_bitmask_bytes.max(capacity.div_ceil(8));
            let slots_offset = bitmask_bytes.next_multiple_of(item_layout.align());

            let fits = capacity
                .checked_mul(element_size)
                .and_then(|slot_bytes| slot_bytes.checked_add(slots_offset))
                .is_some_and(|end| end <= buffer_size);

            if fits {
                break (bitmask_bytes, slots_offset);
            }

            if capacity == 0 {
                return Err(Error::BufferTooSmall {
                    buffer_size,
                    element_size,
                });
            }

            capacity = capacity
                .checked_sub(1)
                .expect("guarded by zero check above");
        };

        if capacity == 0 {
            return Err(Error::BufferTooSmall {
                buffer_size,
                element_size,
            });
        }

        Ok(Self {
            buffer_size,
            element_size,
            bitmask_len,
            bitmask_bytes,
            slots_offset,
            capacity,
        })
    }

    /// Plans the layout of a buffer of `buffer_size` bytes holding items of type `T`.
    ///
    /// # Errors
    ///
    /// See [`plan()`][Self::plan].
    pub fn for_type<T>(buffer_size: usize) -> Result<Self> {
        Self::plan(buffer_size, Layout::new::<T>())
    }

    /// Size of the whole buffer, in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Size of one slot, in bytes.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of items the buffer could hold if it held nothing else.
    #[must_use]
    pub fn bitmask_len(&self) -> usize {
        self.bitmask_len
    }

    /// Number of bytes at the start of the buffer reserved for the occupancy bitmask.
    #[must_use]
    pub fn bitmask_bytes(&self) -> usize {
        self.bitmask_bytes
    }

    /// Offset of the first slot from the start of the buffer, in bytes.
    #[must_use]
    pub fn slots_offset(&self) -> usize {
        self.slots_offset
    }

    /// Maximum number of items the pool can hold at the same time.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

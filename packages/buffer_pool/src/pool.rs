use std::any::type_name;
use std::iter::FusedIterator;
use std::mem::MaybeUninit;
use std::{fmt, slice, thread};

use num_integer::Integer;
use tracing::{debug, trace};

use crate::{BufferPoolBuilder, DropPolicy, Error, Geometry, Occupancy, Result};

/// A fixed-capacity object pool that lives entirely inside a caller-provided byte buffer.
///
/// The start of the buffer holds an occupancy bitmask with one bit per slot and the rest is
/// divided into slots of `size_of::<T>()` bytes. See [`Geometry`] for the exact layout. The pool
/// never allocates memory and never moves an item once it is inserted.
///
/// Inserting an item returns a [`Key`] that identifies its slot. Items are placed in the first
/// free slot, scanning the bitmask from the start, so freed slots are reused lowest-first.
///
/// Items can also be addressed by their position among the live items via [`nth()`][1] and
/// friends. Positions follow slot order, not insertion order, so removing an item shifts the
/// position of every item after it and a later insert may take a position in the middle.
///
/// # Keys
///
/// A key is only the index of a slot. Once an item is removed, a later insert may reuse the
/// slot, after which the old key refers to the new item. Operations on a key whose slot is
/// vacant fail with [`Error::InvalidKey`].
///
/// # Buffer ownership
///
/// The pool borrows the buffer for its entire lifetime and does not free it. What happens to
/// items still in the pool when the pool is dropped is governed by its [`DropPolicy`].
///
/// The buffer is a slice of [`MaybeUninit<u8>`] because items may leave padding or other
/// uninitialized bytes behind in their slots, both while they are in the pool and after they
/// are removed. Only the bitmask region is guaranteed to be initialized once the pool is gone.
///
/// # Thread safety
///
/// The pool has no internal synchronization. It can be moved to or shared with another thread
/// if `T` allows it, with all mutation going through `&mut self` as usual.
///
/// # Example
///
/// ```rust
/// use std::mem::MaybeUninit;
///
/// use buffer_pool::BufferPool;
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 2048];
/// let mut pool = BufferPool::<[u8; 16]>::new(&mut buffer).unwrap();
///
/// assert_eq!(pool.capacity(), 127);
///
/// let a = pool.insert_value([1; 16]).unwrap();
/// let b = pool.insert_value([2; 16]).unwrap();
///
/// assert_eq!(pool.len(), 2);
/// assert_eq!(pool.get(b).unwrap()[0], 2);
/// assert_eq!(pool.nth(0).unwrap()[0], 1);
///
/// pool.remove(a).unwrap();
/// assert_eq!(pool.nth(0).unwrap()[0], 2);
/// ```
///
/// [1]: Self::nth
pub struct BufferPool<'b, T> {
    geometry: Geometry,

    occupancy: Occupancy<'b>,

    /// One entry per slot. An entry is initialized if and only if its bit in `occupancy` is set.
    slots: &'b mut [MaybeUninit<T>],

    /// Number of set bits in `occupancy`, kept here so we do not have to count them.
    count: usize,

    drop_policy: DropPolicy,
}

/// Identifies the slot of an item in a [`BufferPool`].
///
/// Keys are returned by the insertion methods and consumed by lookup and removal. They are
/// plain slot indexes: a key stays valid until its item is removed and is not tied to a
/// particular pool instance.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    index: usize,
}

impl Key {
    /// Index of the slot in the pool. Lower indexes come first in enumeration order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<'b, T> BufferPool<'b, T> {
    pub(crate) fn new_inner(
        buffer: &'b mut [MaybeUninit<u8>],
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let geometry = Geometry::for_type::<T>(buffer.len())?;

        if !buffer.as_ptr().cast::<T>().is_aligned() {
            return Err(Error::MisalignedBuffer {
                address: buffer.as_ptr().addr(),
                required_alignment: align_of::<T>(),
            });
        }

        let (bitmask, slot_bytes) = buffer.split_at_mut(geometry.slots_offset());

        let bitmask = bitmask
            .get_mut(..geometry.bitmask_bytes())
            .expect("slots always start after the bitmask");

        let occupancy = Occupancy::new(bitmask, geometry.capacity());

        // SAFETY: The geometry guarantees that `capacity` items fit after `slots_offset`, the
        // offset is a multiple of the item alignment and we checked the buffer start is aligned.
        // Any bytes, initialized or not, are valid for `MaybeUninit<T>`. The memory is exclusively
        // borrowed for 'b and we consume the only other reference to it here.
        let slots = unsafe {
            slice::from_raw_parts_mut(
                slot_bytes.as_mut_ptr().cast::<MaybeUninit<T>>(),
                geometry.capacity(),
            )
        };

        debug!(
            item_type = type_name::<T>(),
            buffer_size = geometry.buffer_size(),
            bitmask_bytes = geometry.bitmask_bytes(),
            slots_offset = geometry.slots_offset(),
            capacity = geometry.capacity(),
            "created buffer pool"
        );

        Ok(Self {
            geometry,
            occupancy,
            slots,
            count: 0,
            drop_policy,
        })
    }

    /// Creates a pool inside `buffer` with the default configuration.
    ///
    /// The start of the buffer is overwritten with an empty occupancy bitmask, so the buffer
    /// does not need to be initialized in advance.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is zero-sized, if the buffer is not aligned for `T` or if the
    /// buffer is too small to hold even one item.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::mem::MaybeUninit;
    ///
    /// use buffer_pool::{BufferPool, Error};
    ///
    /// let mut buffer = [MaybeUninit::<u8>::uninit(); 64];
    /// let pool = BufferPool::<[u8; 16]>::new(&mut buffer).unwrap();
    /// assert_eq!(pool.capacity(), 3);
    ///
    /// let mut tiny = [MaybeUninit::<u8>::uninit(); 16];
    /// assert!(matches!(
    ///     BufferPool::<[u8; 16]>::new(&mut tiny),
    ///     Err(Error::BufferTooSmall { .. })
    /// ));
    /// ```
    pub fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Result<Self> {
        Self::builder().build(buffer)
    }

    /// Starts building a new [`BufferPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    pub fn builder() -> BufferPoolBuilder<T> {
        BufferPoolBuilder::new()
    }

    /// The layout of the buffer, as planned when the pool was created.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// The number of items in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// The maximum number of items the pool can hold. This never changes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.geometry.capacity()
    }

    /// Whether the pool contains no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether every slot is occupied, meaning the next insert will fail.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Inserts a default-constructed item into the first free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolFull`] if every slot is occupied.
    pub fn insert(&mut self) -> Result<Key>
    where
        T: Default,
    {
        self.insert_with(T::default)
    }

    /// Inserts `value` into the first free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolFull`] if every slot is occupied. The value is dropped in that case.
    pub fn insert_value(&mut self, value: T) -> Result<Key> {
        self.insert_with(|| value)
    }

    /// Inserts the value returned by `f` into the first free slot.
    ///
    /// `f` is only called once a free slot has been found. If it panics, the pool is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolFull`] without calling `f` if every slot is occupied.
    pub fn insert_with<F>(&mut self, f: F) -> Result<Key>
    where
        F: FnOnce() -> T,
    {
        #[cfg(debug_assertions)]
        self.integrity_check();

        let Some(index) = self.occupancy.find_first_free() else {
            debug!(
                item_type = type_name::<T>(),
                capacity = self.capacity(),
                "insert rejected because buffer pool is full"
            );

            return Err(Error::PoolFull {
                capacity: self.capacity(),
            });
        };

        let slot = self
            .slots
            .get_mut(index)
            .expect("occupancy bitmask only describes slots within capacity");

        slot.write(f());

        self.occupancy.set(index);

        self.count = self
            .count
            .checked_add(1)
            .expect("guarded by free slot existing");

        trace!(index, count = self.count, "inserted item");

        Ok(Key { index })
    }

    /// Whether `key` refers to an item currently in the pool.
    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.occupancy.is_set(key.index)
    }

    /// Returns a reference to the item identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the slot of the key is vacant or out of bounds.
    pub fn get(&self, key: Key) -> Result<&T> {
        let slot = self.occupied_slot(key.index)?;

        // SAFETY: The slot is occupied, so it holds an initialized item.
        Ok(unsafe { slot.assume_init_ref() })
    }

    /// Returns an exclusive reference to the item identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the slot of the key is vacant or out of bounds.
    pub fn get_mut(&mut self, key: Key) -> Result<&mut T> {
        let slot = self.occupied_slot_mut(key.index)?;

        // SAFETY: The slot is occupied, so it holds an initialized item.
        Ok(unsafe { slot.assume_init_mut() })
    }

    /// Drops the item identified by `key` in place and frees its slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the slot of the key is vacant or out of bounds, which
    /// includes removing the same key twice.
    pub fn remove(&mut self, key: Key) -> Result<()> {
        self.vacate(key.index)?;

        let slot = self
            .slots
            .get_mut(key.index)
            .expect("vacate() succeeds only for in-bounds slots");

        // SAFETY: The slot was occupied until the vacate() above, so it holds an initialized item.
        // It is now marked free, so nothing will read or drop the item again, even if its
        // destructor panics.
        unsafe {
            slot.assume_init_drop();
        }

        Ok(())
    }

    /// Moves the item identified by `key` out of the pool and frees its slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if the slot of the key is vacant or out of bounds.
    pub fn take(&mut self, key: Key) -> Result<T> {
        self.vacate(key.index)?;

        let slot = self
            .slots
            .get(key.index)
            .expect("vacate() succeeds only for in-bounds slots");

        // SAFETY: The slot was occupied until the vacate() above, so it holds an initialized item.
        // It is now marked free, so this is the only copy of the item that will be used.
        Ok(unsafe { slot.assume_init_read() })
    }

    /// Translates a pointer to an item in the pool back into the key of its slot.
    ///
    /// Only the address is inspected; the pointer is never dereferenced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if the pointer does not point to the start of an
    /// occupied slot of this pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::mem::MaybeUninit;
    ///
    /// use buffer_pool::BufferPool;
    ///
    /// let mut buffer = [MaybeUninit::<u8>::uninit(); 256];
    /// let mut pool = BufferPool::<[u8; 16]>::new(&mut buffer).unwrap();
    ///
    /// let key = pool.insert().unwrap();
    /// let ptr: *const [u8; 16] = pool.get(key).unwrap();
    ///
    /// assert_eq!(pool.key_of_ptr(ptr).unwrap(), key);
    /// ```
    pub fn key_of_ptr(&self, ptr: *const T) -> Result<Key> {
        let address = ptr.addr();

        let index = address
            .checked_sub(self.slots.as_ptr().addr())
            .map(|offset| offset.div_rem(&size_of::<T>()))
            .and_then(|(index, misalignment)| (misalignment == 0).then_some(index))
            .filter(|index| self.occupancy.is_set(*index));

        match index {
            Some(index) => Ok(Key { index }),
            None => Err(Error::InvalidPointer { address }),
        }
    }

    /// Drops the item that `ptr` points to and frees its slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] if the pointer does not point to the start of an
    /// occupied slot of this pool, which includes removing the same item twice.
    pub fn remove_ptr(&mut self, ptr: *const T) -> Result<()> {
        let key = self.key_of_ptr(ptr)?;
        self.remove(key)
    }

    /// Returns a reference to the `n`-th item in slot order, counting from zero.
    ///
    /// Returns `None` if the pool holds `n` or fewer items. This scans the occupancy bitmask from
    /// the start, so it takes time proportional to the position of the item in the buffer.
    #[must_use]
    pub fn nth(&self, n: usize) -> Option<&T> {
        let index = self.nth_key(n)?.index;

        let slot = self
            .slots
            .get(index)
            .expect("occupancy bitmask only describes slots within capacity");

        // SAFETY: The rank scan only yields occupied slots, which hold initialized items.
        Some(unsafe { slot.assume_init_ref() })
    }

    /// Returns an exclusive reference to the `n`-th item in slot order, counting from zero.
    ///
    /// Returns `None` if the pool holds `n` or fewer items.
    #[must_use]
    pub fn nth_mut(&mut self, n: usize) -> Option<&mut T> {
        let index = self.nth_key(n)?.index;

        let slot = self
            .slots
            .get_mut(index)
            .expect("occupancy bitmask only describes slots within capacity");

        // SAFETY: The rank scan only yields occupied slots, which hold initialized items.
        Some(unsafe { slot.assume_init_mut() })
    }

    /// Returns the key of the `n`-th item in slot order, counting from zero.
    ///
    /// Returns `None` if the pool holds `n` or fewer items.
    #[must_use]
    pub fn nth_key(&self, n: usize) -> Option<Key> {
        if n >= self.count {
            return None;
        }

        let index = self
            .occupancy
            .rank(n)
            .expect("count matches the number of occupied slots");

        Some(Key { index })
    }

    /// Iterates over the items in slot order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            keys: self.keys(),
            slots: &*self.slots,
        }
    }

    /// Iterates over exclusive references to the items in slot order.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            occupancy: &self.occupancy,
            slots: self.slots.iter_mut(),
            next_index: 0,
            remaining: self.count,
        }
    }

    /// Iterates over the keys of the items in slot order.
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            occupancy: &self.occupancy,
            next_index: 0,
            remaining: self.count,
        }
    }

    /// Drops every item in the pool, in slot order, leaving the pool empty.
    pub fn clear(&mut self) {
        let mut from = 0;

        while let Some(index) = self.occupancy.next_occupied(from) {
            // The key comes straight from the bitmask, so this cannot fail.
            self.remove(Key { index })
                .expect("occupied slot found by scan must be removable");

            from = index.checked_add(1).expect("index is below capacity");
        }

        debug_assert_eq!(self.count, 0);
    }

    fn occupied_slot(&self, index: usize) -> Result<&MaybeUninit<T>> {
        if !self.occupancy.is_set(index) {
            return Err(Error::InvalidKey { index });
        }

        Ok(self
            .slots
            .get(index)
            .expect("occupancy bitmask only describes slots within capacity"))
    }

    fn occupied_slot_mut(&mut self, index: usize) -> Result<&mut MaybeUninit<T>> {
        if !self.occupancy.is_set(index) {
            return Err(Error::InvalidKey { index });
        }

        Ok(self
            .slots
            .get_mut(index)
            .expect("occupancy bitmask only describes slots within capacity"))
    }

    /// Marks an occupied slot as free without touching the item in it.
    fn vacate(&mut self, index: usize) -> Result<()> {
        #[cfg(debug_assertions)]
        self.integrity_check();

        if !self.occupancy.is_set(index) {
            return Err(Error::InvalidKey { index });
        }

        self.occupancy.clear(index);

        self.count = self
            .count
            .checked_sub(1)
            .expect("slot was occupied so count must be non-zero");

        trace!(index, count = self.count, "removed item");

        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self) {
        let observed_occupied_count = self.occupancy.count_ones();

        assert!(
            self.count == observed_occupied_count,
            "self.count {} does not match the observed occupied count {} in buffer pool of {}",
            self.count,
            observed_occupied_count,
            type_name::<T>()
        );

        assert!(
            self.count <= self.capacity(),
            "self.count {} exceeds capacity {} in buffer pool of {}",
            self.count,
            self.capacity(),
            type_name::<T>()
        );
    }
}

impl<T> Drop for BufferPool<'_, T> {
    fn drop(&mut self) {
        if self.count > 0 {
            debug!(
                item_type = type_name::<T>(),
                remaining = self.count,
                drop_policy = ?self.drop_policy,
                "dropping non-empty buffer pool"
            );
        }

        match self.drop_policy {
            DropPolicy::LeaveItems => {}
            DropPolicy::DropItems => self.clear(),
            DropPolicy::MustNotDropItems => {
                // If we are already panicking, we do not want to panic again because that will
                // simply obscure whatever the original panic was, leading to debug difficulties.
                if !thread::panicking() {
                    assert!(
                        self.count == 0,
                        "dropped a non-empty buffer pool of {} with a policy that says it must be empty when dropped",
                        type_name::<T>()
                    );
                }
            }
        }
    }
}

impl<T> fmt::Debug for BufferPool<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("geometry", &self.geometry)
            .field("count", &self.count)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<'a, T> IntoIterator for &'a BufferPool<'_, T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut BufferPool<'_, T> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the keys of the items in a [`BufferPool`], in slot order.
///
/// Created by [`BufferPool::keys()`]. A full pass scans the occupancy bitmask once.
#[derive(Debug)]
pub struct Keys<'a> {
    occupancy: &'a Occupancy<'a>,
    next_index: usize,
    remaining: usize,
}

impl Iterator for Keys<'_> {
    type Item = Key;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.occupancy.next_occupied(self.next_index)?;

        self.next_index = index.checked_add(1).expect("index is below capacity");
        self.remaining = self.remaining.saturating_sub(1);

        Some(Key { index })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Keys<'_> {}
impl FusedIterator for Keys<'_> {}

/// Iterator over the items in a [`BufferPool`], in slot order.
///
/// Created by [`BufferPool::iter()`].
pub struct Iter<'a, T> {
    keys: Keys<'a>,
    slots: &'a [MaybeUninit<T>],
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;

        let slot = self
            .slots
            .get(key.index)
            .expect("occupancy bitmask only describes slots within capacity");

        // SAFETY: The key came from the occupancy bitmask, so the slot holds an initialized item.
        // The pool is borrowed for 'a, so the item cannot be removed while the reference lives.
        Some(unsafe { slot.assume_init_ref() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// Iterator over exclusive references to the items in a [`BufferPool`], in slot order.
///
/// Created by [`BufferPool::iter_mut()`].
pub struct IterMut<'a, T> {
    occupancy: &'a Occupancy<'a>,

    /// Slots from `next_index` onwards.
    slots: slice::IterMut<'a, MaybeUninit<T>>,

    next_index: usize,
    remaining: usize,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.occupancy.next_occupied(self.next_index)?;

        let skip = index
            .checked_sub(self.next_index)
            .expect("next occupied slot is never before the starting point");

        let slot = self
            .slots
            .nth(skip)
            .expect("occupancy bitmask only describes slots within capacity");

        self.next_index = index.checked_add(1).expect("index is below capacity");
        self.remaining = self.remaining.saturating_sub(1);

        // SAFETY: The index came from the occupancy bitmask, so the slot holds an initialized
        // item. The pool is exclusively borrowed for 'a and each slot is yielded at most once.
        Some(unsafe { slot.assume_init_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

impl<T> fmt::Debug for IterMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("next_index", &self.next_index)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(BufferPool<'static, u32>: Send, Sync);
    assert_not_impl_any!(BufferPool<'static, Rc<u32>>: Send, Sync);
    assert_not_impl_any!(BufferPool<'static, u32>: Clone);
    assert_impl_all!(Key: Send, Sync, Copy);

    /// 16-byte item, matching the classic "2048 byte buffer" sizing.
    type Item = [u64; 2];

    #[repr(C, align(16))]
    struct Aligned<const N: usize>([MaybeUninit<u8>; N]);

    impl<const N: usize> Aligned<N> {
        fn new() -> Self {
            Self([MaybeUninit::uninit(); N])
        }

        fn filled(value: u8) -> Self {
            Self([MaybeUninit::new(value); N])
        }
    }

    #[test]
    fn smoke_test() {
        let mut buffer = Aligned::<2048>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        assert_eq!(pool.capacity(), 127);
        assert!(pool.is_empty());

        let a = pool.insert_value([1, 1]).unwrap();
        let b = pool.insert_value([2, 2]).unwrap();
        let c = pool.insert_value([3, 3]).unwrap();

        assert_eq!(*pool.get(a).unwrap(), [1, 1]);
        assert_eq!(*pool.get(b).unwrap(), [2, 2]);
        assert_eq!(*pool.get(c).unwrap(), [3, 3]);
        assert_eq!(pool.len(), 3);

        pool.remove(b).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(b));

        let d = pool.insert_value([4, 4]).unwrap();

        assert_eq!(d, b);
        assert_eq!(*pool.get(d).unwrap(), [4, 4]);
    }

    #[test]
    fn insert_is_default_constructed() {
        let mut buffer = Aligned::<256>::filled(0xEE);

        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = pool.insert().unwrap();
        assert_eq!(*pool.get(key).unwrap(), [0, 0]);
    }

    #[test]
    fn keys_are_handed_out_in_slot_order() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        for expected in 0..5 {
            assert_eq!(pool.insert().unwrap().index(), expected);
        }
    }

    #[test]
    fn fill_then_full_error() {
        let mut buffer = Aligned::<2048>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        for _ in 0..127 {
            pool.insert().unwrap();
        }

        assert!(pool.is_full());
        assert_eq!(pool.insert(), Err(Error::PoolFull { capacity: 127 }));
        assert_eq!(pool.len(), 127);
    }

    #[test]
    fn insert_with_not_called_when_full() {
        let mut buffer = Aligned::<80>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        while !pool.is_full() {
            pool.insert().unwrap();
        }

        let result = pool.insert_with(|| panic!("must not construct an item without a slot"));
        assert!(matches!(result, Err(Error::PoolFull { .. })));
    }

    #[test]
    fn panicking_constructor_leaves_pool_unchanged() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        pool.insert().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            _ = pool.insert_with(|| panic!("constructor failed"));
        }));

        assert!(result.is_err());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.insert().unwrap().index(), 1);
    }

    #[test]
    fn remove_twice_is_invalid_key() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = pool.insert().unwrap();

        pool.remove(key).unwrap();
        assert_eq!(pool.remove(key), Err(Error::InvalidKey { index: 0 }));
        assert_eq!(pool.take(key), Err(Error::InvalidKey { index: 0 }));
        assert!(pool.get(key).is_err());
        assert!(pool.get_mut(key).is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn key_beyond_capacity_is_invalid() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = Key { index: 10_000 };

        assert!(!pool.contains(key));
        assert_eq!(pool.get(key), Err(Error::InvalidKey { index: 10_000 }));
        assert_eq!(pool.remove(key), Err(Error::InvalidKey { index: 10_000 }));
    }

    #[test]
    fn take_moves_item_out() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = pool.insert_value([7, 8]).unwrap();

        assert_eq!(pool.take(key).unwrap(), [7, 8]);
        assert!(pool.is_empty());
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = pool.insert().unwrap();
        pool.get_mut(key).unwrap()[1] = 99;

        assert_eq!(*pool.get(key).unwrap(), [0, 99]);
    }

    #[test]
    fn pointer_round_trip() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        _ = pool.insert().unwrap();
        let key = pool.insert().unwrap();

        let ptr: *const Item = pool.get(key).unwrap();
        assert_eq!(pool.key_of_ptr(ptr), Ok(key));

        pool.remove_ptr(ptr).unwrap();
        assert!(!pool.contains(key));

        assert_eq!(
            pool.remove_ptr(ptr),
            Err(Error::InvalidPointer {
                address: ptr.addr()
            })
        );
    }

    #[test]
    fn misaligned_or_foreign_pointer_is_invalid() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let key = pool.insert().unwrap();
        let ptr: *const Item = pool.get(key).unwrap();

        let inside = ptr.cast::<u8>().wrapping_add(4).cast::<Item>();
        assert!(matches!(
            pool.key_of_ptr(inside),
            Err(Error::InvalidPointer { .. })
        ));

        let before = ptr.cast::<u8>().wrapping_sub(1).cast::<Item>();
        assert!(matches!(
            pool.key_of_ptr(before),
            Err(Error::InvalidPointer { .. })
        ));

        let elsewhere: Item = [0, 0];
        assert!(matches!(
            pool.key_of_ptr(&raw const elsewhere),
            Err(Error::InvalidPointer { .. })
        ));

        // Vacant slot right after the occupied one.
        let vacant = ptr.wrapping_add(1);
        assert!(matches!(
            pool.key_of_ptr(vacant),
            Err(Error::InvalidPointer { .. })
        ));

        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn nth_follows_slot_order_not_insertion_order() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let a = pool.insert_value([0, 0xA]).unwrap();
        let b = pool.insert_value([0, 0xB]).unwrap();
        _ = pool.insert_value([0, 0xC]).unwrap();

        pool.remove(a).unwrap();
        assert_eq!(pool.nth(0).unwrap()[1], 0xB);

        // The new item lands in slot 0, before B.
        _ = pool.insert_value([0, 0xD]).unwrap();
        assert_eq!(pool.nth(0).unwrap()[1], 0xD);
        assert_eq!(pool.nth(1).unwrap()[1], 0xB);
        assert_eq!(pool.nth(2).unwrap()[1], 0xC);
        assert_eq!(pool.nth_key(1), Some(b));
    }

    #[test]
    fn nth_out_of_range_is_none() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        assert!(pool.nth(0).is_none());

        pool.insert().unwrap();

        assert!(pool.nth(0).is_some());
        assert!(pool.nth(1).is_none());
        assert!(pool.nth_mut(1).is_none());
        assert!(pool.nth_key(usize::MAX).is_none());
    }

    #[test]
    fn nth_mut_modifies_in_place() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        pool.insert().unwrap();
        let key = pool.insert().unwrap();

        pool.nth_mut(1).unwrap()[0] = 5;

        assert_eq!(*pool.get(key).unwrap(), [5, 0]);
    }

    #[test]
    fn iterators_agree_with_nth() {
        let mut buffer = Aligned::<2048>::new();
        let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let keys = (0..100_u64)
            .map(|value| pool.insert_value([value, 0]).unwrap())
            .collect::<Vec<_>>();

        for key in keys.iter().step_by(3) {
            pool.remove(*key).unwrap();
        }

        let values = pool.iter().map(|item| item[0]).collect::<Vec<_>>();
        assert_eq!(values.len(), pool.len());
        assert_eq!(pool.iter().len(), pool.len());

        for (n, value) in values.iter().enumerate() {
            assert_eq!(pool.nth(n).unwrap()[0], *value);
        }

        let iterated_keys = pool.keys().collect::<Vec<_>>();
        assert!(iterated_keys.windows(2).all(|pair| pair[0] < pair[1]));

        for item in &mut pool {
            item[1] = item[0] * 2;
        }

        for item in &pool {
            assert_eq!(item[1], item[0] * 2);
        }

        assert_eq!(pool.iter_mut().count(), pool.len());
    }

    struct Droppable<'c>(&'c Cell<usize>);

    impl Drop for Droppable<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn clear_drops_everything() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Droppable<'_>>::new(&mut buffer.0).unwrap();

        for _ in 0..5 {
            pool.insert_value(Droppable(&dropped)).unwrap();
        }

        pool.clear();

        assert_eq!(dropped.get(), 5);
        assert!(pool.is_empty());
        assert_eq!(pool.insert_value(Droppable(&dropped)).unwrap().index(), 0);
    }

    #[test]
    fn rejected_value_is_dropped_when_full() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<80>::new();
        let mut pool = BufferPool::<Droppable<'_>>::new(&mut buffer.0).unwrap();

        while !pool.is_full() {
            pool.insert_value(Droppable(&dropped)).unwrap();
        }

        assert_eq!(dropped.get(), 0);

        let result = pool.insert_value(Droppable(&dropped));

        assert!(matches!(result, Err(Error::PoolFull { .. })));
        assert_eq!(dropped.get(), 1);
        assert!(pool.is_full());

        pool.clear();
        assert_eq!(dropped.get(), 1 + pool.capacity());
    }

    #[test]
    fn padded_items_leave_bitmask_readable_after_pool_is_gone() {
        #[derive(Default)]
        struct Padded {
            small: u8,
            large: u64,
        }

        let mut buffer = Aligned::<256>::new();

        {
            let mut pool = BufferPool::<Padded>::new(&mut buffer.0).unwrap();

            let key = pool.insert_value(Padded { small: 1, large: 2 }).unwrap();
            assert_eq!(pool.get(key).unwrap().small, 1);
            assert_eq!(pool.get(key).unwrap().large, 2);

            pool.insert().unwrap();
            let removed = pool.insert().unwrap();
            pool.remove(removed).unwrap();
        }

        let geometry = Geometry::for_type::<Padded>(256).unwrap();

        // SAFETY: The bitmask region is initialized when the pool is created and only ever
        // holds fully initialized bytes. Item slots are not read here.
        let bitmask = buffer.0[..geometry.bitmask_bytes()]
            .iter()
            .map(|byte| unsafe { byte.assume_init() })
            .collect::<Vec<_>>();

        assert_eq!(bitmask[0], 0b1100_0000);
        assert!(bitmask[1..].iter().all(|byte| *byte == 0));

        // The buffer, padding and all, can be handed to a new pool.
        let mut pool = BufferPool::<MaybeUninit<u64>>::new(&mut buffer.0).unwrap();
        assert!(pool.is_empty());

        let key = pool.insert_value(MaybeUninit::uninit()).unwrap();
        pool.remove(key).unwrap();
    }

    #[test]
    fn calls_drop_on_remove() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Droppable<'_>>::new(&mut buffer.0).unwrap();

        let key = pool.insert_value(Droppable(&dropped)).unwrap();
        pool.remove(key).unwrap();

        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn take_does_not_drop() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Droppable<'_>>::new(&mut buffer.0).unwrap();

        let key = pool.insert_value(Droppable(&dropped)).unwrap();
        let item = pool.take(key).unwrap();

        assert_eq!(dropped.get(), 0);
        drop(item);
        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn leave_items_policy_does_not_drop() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<256>::new();
        {
            let mut pool = BufferPool::<Droppable<'_>>::new(&mut buffer.0).unwrap();
            pool.insert_value(Droppable(&dropped)).unwrap();
        }

        assert_eq!(dropped.get(), 0);
    }

    #[test]
    fn drop_items_policy_drops() {
        let dropped = Cell::new(0);

        let mut buffer = Aligned::<256>::new();
        {
            let mut pool = BufferPool::<Droppable<'_>>::builder()
                .drop_policy(DropPolicy::DropItems)
                .build(&mut buffer.0)
                .unwrap();

            pool.insert_value(Droppable(&dropped)).unwrap();
            pool.insert_value(Droppable(&dropped)).unwrap();
        }

        assert_eq!(dropped.get(), 2);
    }

    #[test]
    #[should_panic]
    fn drop_item_with_forbidden_to_drop_policy_panics() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build(&mut buffer.0)
            .unwrap();

        _ = pool.insert().unwrap();
    }

    #[test]
    fn drop_itemless_with_forbidden_to_drop_policy_ok() {
        let mut buffer = Aligned::<256>::new();
        let mut pool = BufferPool::<Item>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build(&mut buffer.0)
            .unwrap();

        let key = pool.insert().unwrap();
        pool.remove(key).unwrap();
    }

    #[test]
    fn misaligned_buffer_is_error() {
        let mut buffer = Aligned::<256>::new();

        assert!(matches!(
            BufferPool::<u64>::new(&mut buffer.0[1..]),
            Err(Error::MisalignedBuffer {
                required_alignment: 8,
                ..
            })
        ));

        // Byte arrays have no alignment requirement.
        assert!(BufferPool::<[u8; 8]>::new(&mut buffer.0[1..]).is_ok());
    }

    #[test]
    fn construction_errors() {
        let mut buffer = Aligned::<16>::new();

        assert!(matches!(
            BufferPool::<Item>::new(&mut buffer.0),
            Err(Error::BufferTooSmall { .. })
        ));

        assert!(matches!(
            BufferPool::<()>::new(&mut buffer.0),
            Err(Error::ZeroSizedElement)
        ));
    }

    #[test]
    fn debug_output_mentions_geometry() {
        let mut buffer = Aligned::<256>::new();
        let pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

        let debug = format!("{pool:?}");

        assert!(debug.contains("geometry"));
        assert!(debug.contains("count"));
    }

    #[test]
    fn bitmask_lives_at_start_of_buffer() {
        let mut buffer = Aligned::<2048>::filled(0xFF);

        {
            let mut pool = BufferPool::<Item>::new(&mut buffer.0).unwrap();

            pool.insert().unwrap();
            pool.insert().unwrap();
        }

        // SAFETY: The bitmask was zeroed, the two items have no padding and the rest of the
        // buffer was filled before the pool was created, so every byte is initialized.
        let bytes = buffer.0.map(|byte| unsafe { byte.assume_init() });

        // Two occupied slots, highest bits first.
        assert_eq!(bytes[0], 0b1100_0000);
        assert!(bytes[1..16].iter().all(|byte| *byte == 0));

        // Slot 0 begins right after the 16 bitmask bytes and holds a default item.
        assert!(bytes[16..48].iter().all(|byte| *byte == 0));
        assert_eq!(bytes[48], 0xFF);
    }
}

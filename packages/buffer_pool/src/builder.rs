use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

use crate::{BufferPool, DropPolicy, Result};

/// Builder for creating an instance of [`BufferPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`BufferPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use buffer_pool::{BufferPool, DropPolicy};
///
/// let mut buffer = [MaybeUninit::<u8>::uninit(); 1024];
///
/// let pool = BufferPool::<[u8; 16]>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build(&mut buffer)
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 63);
/// ```
///
/// [1]: BufferPool::new
#[must_use]
pub struct BufferPoolBuilder<T> {
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for BufferPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> BufferPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining items in the pool when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool inside `buffer` with the specified configuration.
    ///
    /// The start of the buffer is overwritten with an empty occupancy bitmask. The rest of the
    /// buffer is left as-is until items are inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is zero-sized, if the buffer is not aligned for `T` or if the
    /// buffer is too small to hold even one item.
    pub fn build(self, buffer: &mut [MaybeUninit<u8>]) -> Result<BufferPool<'_, T>> {
        BufferPool::new_inner(buffer, self.drop_policy)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn debug_names_item_type() {
        let builder = BufferPool::<u32>::builder().drop_policy(DropPolicy::DropItems);

        let debug = format!("{builder:?}");
        assert!(debug.contains("u32"));
        assert!(debug.contains("DropItems"));
    }

    #[test]
    fn default_policy_leaves_items() {
        let builder = BufferPool::<u32>::builder();

        assert_eq!(builder.drop_policy, DropPolicy::LeaveItems);
    }
}

/// Determines what happens to items still in the pool when the pool is dropped.
///
/// The pool never owns its buffer, so by default it leaves any remaining items where they are
/// and hands the buffer back to the caller untouched. Their destructors do not run.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use buffer_pool::{BufferPool, DropPolicy};
///
/// #[repr(align(8))]
/// struct Buffer([MaybeUninit<u8>; 256]);
///
/// let mut buffer = Buffer([MaybeUninit::uninit(); 256]);
///
/// // The drop policy is set at pool creation time.
/// let pool = BufferPool::<u64>::builder()
///     .drop_policy(DropPolicy::DropItems)
///     .build(&mut buffer.0)
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Remaining items stay in the buffer and are never dropped. Cleaning them up (or deciding
    /// not to) is up to the owner of the buffer. This is the default.
    #[default]
    LeaveItems,

    /// Remaining items are dropped in slot order when the pool is dropped.
    DropItems,

    /// The pool will panic if it still contains items when it is dropped.
    ///
    /// This may be valuable if there are external requirements before the items can be dropped.
    /// For example, it may be known that unsafe code holds pointers into the buffer, with items
    /// only removed after such pointers are no longer used.
    MustNotDropItems,
}

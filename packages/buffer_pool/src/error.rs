use thiserror::Error;

/// Errors that can occur when creating or operating a [`BufferPool`][crate::BufferPool].
///
/// All of these are recoverable. The pool never retries an operation on its own.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The item type is zero-sized, so there is nothing to lay out in the buffer.
    #[error("cannot create a buffer pool for a zero-sized item type")]
    ZeroSizedElement,

    /// The buffer cannot hold even one item once the occupancy bitmask has been carved out of it.
    #[error(
        "buffer of {buffer_size} bytes is too small to hold any {element_size}-byte items after bitmask overhead"
    )]
    BufferTooSmall {
        /// Size of the buffer the caller provided, in bytes.
        buffer_size: usize,

        /// Size of one item, in bytes.
        element_size: usize,
    },

    /// The buffer does not start at an address that satisfies the alignment of the item type.
    #[error("buffer at {address:#x} is not aligned to the {required_alignment}-byte item alignment")]
    MisalignedBuffer {
        /// Address of the first byte of the buffer.
        address: usize,

        /// Alignment required by the item type.
        required_alignment: usize,
    },

    /// Every slot is occupied. Remove an item before inserting another.
    #[error("buffer pool is full ({capacity} items)")]
    PoolFull {
        /// Capacity of the pool.
        capacity: usize,
    },

    /// The key does not refer to an occupied slot. The slot was either never filled, has
    /// already been vacated or lies beyond the capacity of the pool.
    #[error("key with slot index {index} does not refer to an item in the pool")]
    InvalidKey {
        /// Slot index carried by the rejected key.
        index: usize,
    },

    /// The pointer does not point at the start of an occupied slot of this pool.
    #[error("pointer {address:#x} does not point to an item in the pool")]
    InvalidPointer {
        /// The rejected address.
        address: usize,
    },
}

/// A specialized `Result` type for buffer pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Clone);

    #[test]
    fn messages_carry_details() {
        let error = Error::BufferTooSmall {
            buffer_size: 8,
            element_size: 16,
        };
        let message = error.to_string();
        assert!(message.contains('8'));
        assert!(message.contains("16"));

        let error = Error::PoolFull { capacity: 127 };
        assert!(error.to_string().contains("127"));
    }

    #[test]
    fn misaligned_address_is_hex() {
        let error = Error::MisalignedBuffer {
            address: 0x1001,
            required_alignment: 8,
        };

        assert!(error.to_string().contains("0x1001"));
    }
}

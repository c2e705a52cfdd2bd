#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A fixed-capacity object pool that lives entirely inside a byte buffer provided by the caller.
//!
//! This package provides [`BufferPool`], which stores items of one type in a borrowed buffer and
//! never allocates memory of its own. This makes memory use bounded and predictable, which is
//! what embedded, real-time and custom arena code typically needs.
//!
//! # Buffer layout
//!
//! The start of the buffer holds an occupancy bitmask with one bit per slot, followed by the
//! slots themselves. The bitmask costs one bit per item instead of one index per free slot, so
//! its size does not depend on how the pool is used. The cost is that finding a free slot or
//! the n-th item scans the bitmask. See [`Geometry`] for how the buffer is divided.
//!
//! The buffer is borrowed as `[MaybeUninit<u8>]`. It does not need to be initialized up front,
//! and items may leave uninitialized padding bytes in it after they are gone.
//!
//! # Features
//!
//! - **No allocation**: All bookkeeping lives inside the caller's buffer.
//! - **Stable addresses**: Items never move while they are in the pool.
//! - **Deterministic placement**: New items always go into the lowest free slot.
//! - **Ordered access**: [`nth()`][BufferPool::nth] and the iterators visit items in slot order.
//! - **Explicit failures**: A full pool, a stale key or a foreign pointer is reported as an
//!   [`Error`], never as memory corruption.
//! - **Configurable teardown**: A [`DropPolicy`] decides what happens to items left in the pool.
//!
//! # Example
//!
//! ```rust
//! use std::mem::MaybeUninit;
//!
//! use buffer_pool::{BufferPool, Error};
//!
//! #[derive(Default)]
//! struct Particle {
//!     position: [f32; 2],
//!     velocity: [f32; 2],
//! }
//!
//! #[repr(align(16))]
//! struct Arena([MaybeUninit<u8>; 2048]);
//!
//! let mut arena = Arena([MaybeUninit::uninit(); 2048]);
//! let mut pool = BufferPool::<Particle>::new(&mut arena.0).unwrap();
//!
//! assert_eq!(pool.capacity(), 127);
//!
//! let first = pool.insert().unwrap();
//! pool.get_mut(first).unwrap().velocity = [1.0, 0.5];
//!
//! while !pool.is_full() {
//!     pool.insert().unwrap();
//! }
//!
//! assert!(matches!(pool.insert(), Err(Error::PoolFull { .. })));
//!
//! pool.remove(first).unwrap();
//! assert_eq!(pool.len(), 126);
//!
//! // The freed slot is the first free one, so it is reused.
//! assert_eq!(pool.insert().unwrap(), first);
//! ```

mod builder;
mod drop_policy;
mod error;
mod geometry;
mod occupancy;
mod pool;

pub use builder::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use geometry::Geometry;
pub(crate) use occupancy::*;
pub use pool::*;

//! Basic usage of the `buffer_pool` crate:
//!
//! * Creating a pool inside a buffer.
//! * Adding items until the pool is full.
//! * Accessing items by key and by position.
//! * Removing items and reusing their slots.

use std::mem::MaybeUninit;

use buffer_pool::{BufferPool, Error};

#[derive(Debug, Default)]
struct Sensor {
    id: u32,
    reading: f32,
    samples: u64,
}

// A real application might place this in a static or a memory region reserved by the linker.
#[repr(C, align(8))]
struct Arena([MaybeUninit<u8>; 512]);

fn main() {
    let mut arena = Arena([MaybeUninit::uninit(); 512]);
    let mut pool = BufferPool::<Sensor>::new(&mut arena.0).unwrap();

    println!(
        "Pool of {}-byte items uses {} bitmask bytes and holds up to {} items",
        pool.geometry().element_size(),
        pool.geometry().bitmask_bytes(),
        pool.capacity()
    );

    // Inserting an item gives you a key that you can later use to look up the item again.
    let mut keys = Vec::new();

    for id in 0.. {
        match pool.insert() {
            Ok(key) => {
                pool.get_mut(key).unwrap().id = id;
                keys.push(key);
            }
            Err(Error::PoolFull { capacity }) => {
                println!("Pool is full after {capacity} items");
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // Free up a slot in the middle. The next insert will land there.
    let removed = keys.remove(2);
    pool.remove(removed).unwrap();

    let newcomer = pool.insert().unwrap();
    assert_eq!(newcomer, removed);

    let sensor = pool.get_mut(newcomer).unwrap();
    sensor.id = 1000;
    sensor.reading = 21.5;
    sensor.samples = 1;

    // Positions follow slot order, so the newcomer now sits at position 2.
    println!("Item at position 2: {:?}", pool.nth(2).unwrap());

    for sensor in &pool {
        println!("Sensor {} read {} over {} samples", sensor.id, sensor.reading, sensor.samples);
    }

    // The pool does not own the buffer. Items left in it are not dropped unless configured to
    // be, which does not matter for a type like `Sensor` that has nothing to clean up.
    drop(pool);
}

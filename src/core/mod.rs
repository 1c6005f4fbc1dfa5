// Core primitives shared by the store and the coordinators

pub mod keyed_lock;
pub mod temp_id;

pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use temp_id::{TempIdGenerator, TEMP_ID_PREFIX};

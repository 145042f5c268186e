//! Common orchestration building blocks for the flow manager.
//!
//! - [`KeyedQueue`]: per-key FIFO that hands out at most one item per key
//!   at a time
//! - [`IdPool`]: explicit allocator for numeric resource ids
//!
//! # Example
//!
//! ```
//! use flow_orch_common::KeyedQueue;
//!
//! let mut queue = KeyedQueue::new();
//! queue.push("f1", "create");
//! queue.push("f1", "delete");
//!
//! assert_eq!(queue.next_ready("f1"), Some("create"));
//! // "f1" is busy until released.
//! assert_eq!(queue.next_ready("f1"), None);
//! queue.release("f1");
//! assert_eq!(queue.next_ready("f1"), Some("delete"));
//! ```

mod pool;
mod queue;

pub use pool::{IdPool, PoolError};
pub use queue::KeyedQueue;

//! Request classification and flow-id partitioning.
//!
//! The [`Splitter`] turns an envelope into either a request keyed by flow id
//! or a bulk request with no flow id. Keyed requests and switch acks go
//! through the [`PartitionRouter`], which always picks the same worker for
//! the same flow id.

mod partition;
mod splitter;

pub use partition::PartitionRouter;
pub use splitter::{BulkRequest, Routed, Splitter};

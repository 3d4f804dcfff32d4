//! Worker side of the pipeline: the per-batch jobs and the in-process queue that runs them.
//!
//! Each job reads its batch from the [`LocalLibrary`](crate::media::LocalLibrary), works
//! item by item, and writes results back as it goes, so a failed or abandoned job leaves
//! every finished item persisted.

pub mod media_sizes;
pub mod queue;
pub mod store_images;

pub use media_sizes::{fetch_sizes, SizeLookup};
pub use queue::LocalTaskQueue;
pub use store_images::store_images;

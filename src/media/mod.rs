pub mod library;
pub mod types;

pub use library::{LibraryStats, LocalLibrary};
pub use types::{MediaItem, MediaPage};

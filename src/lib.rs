//! Near-duplicate photo detection for large personal media libraries.
//!
//! A run fetches the user's Google Photos library into a local SQLite cache, downloads a
//! small thumbnail of every item through a pool of background subtasks, embeds the
//! thumbnails with a local ONNX image model, and clusters the embeddings into groups of
//! near-duplicates. Each group names the member most likely to be the original (the
//! largest image, then the earliest).
//!
//! # Architecture
//!
//! - **Storage**: SQLite, one row per media item and user, with forward-only migrations
//! - **Embeddings**: local ONNX Runtime image model (MobileNetV3 by default), L2-normalized
//! - **Similarity**: bounded top-k pair mining plus greedy threshold community detection
//!   over one shared embedding matrix
//! - **Orchestration**: a two-step state machine that fans out per-batch subtasks and polls
//!   them, reporting progress over a channel
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, and migrations
//! - [`media`]: Media item model and the local library
//! - [`photos`]: Google Photos client, image cache, and item source
//! - [`embedding`]: Image-to-vector embedding via ONNX Runtime
//! - [`similarity`]: Pair mining and community detection
//! - [`pipeline`]: Run orchestration, progress, subtasks, and the result report
//! - [`tasks`]: Subtask workers and the in-process task queue
//! - [`error`]: Typed errors for provider calls, subtasks, and runs

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod media;
pub mod photos;
pub mod pipeline;
pub mod similarity;
pub mod tasks;

//! The `pictor` command-line tool.
//!
//! Loads local image files through the engine, optionally resized and
//! transformed, and reports which tier served each load. Running more than
//! one pass shows the memory cache and the disk caches at work.

pub mod app;
pub mod args;

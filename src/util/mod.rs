//! Shared utilities: aligned buffers, timing, rate math, rusage and logging setup

pub mod buffer;
pub mod fast_time;
pub mod logging;
pub mod resource;
pub mod time;

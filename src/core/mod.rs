pub mod context;
pub mod frame;
pub mod manifest;
pub mod media_io;
pub mod scheduler;
pub mod segment;
pub mod source_schedule;
pub mod sync;

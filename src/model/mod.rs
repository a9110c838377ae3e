pub mod line_buffer;
pub mod process;
pub mod snapshot;

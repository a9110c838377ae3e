pub mod headless;
pub mod line_splitter;
pub mod observers;
pub mod process_runner;
pub mod supervisor;

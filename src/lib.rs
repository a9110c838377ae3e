//! Supervise a fixed group of named processes, capture their output into
//! bounded line buffers and publish immutable snapshots of the whole set.

pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod event;
pub mod model;
pub mod ui;

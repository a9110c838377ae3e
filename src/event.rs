use crate::model::snapshot::Snapshot;

/// All events the app loop handles.
#[derive(Debug)]
pub enum AppEvent {
    /// The supervisor published a new snapshot.
    Snapshot(Snapshot),
    /// The host received SIGINT, SIGTERM or SIGHUP.
    Signal(i32),
}

//! Player states and the legality table for state-changing operations.

use std::fmt;

/// Lifecycle state of a managed player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlayerState {
    /// No data source loaded.
    #[default]
    Idle,
    /// A data source is set but nothing has been decoded.
    Initialized,
    /// Preparation is in flight.
    Preparing,
    /// Ready to start output.
    Prepared,
    /// Output is running.
    Started,
    /// Output is suspended at the current position.
    Paused,
    /// Output is stopped; the source must be prepared again before starting.
    Stopped,
    /// The stream reached its end.
    Completed,
}

impl PlayerState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Idle,
        Self::Initialized,
        Self::Preparing,
        Self::Prepared,
        Self::Started,
        Self::Paused,
        Self::Stopped,
        Self::Completed,
    ];

    /// Whether the backend position and duration are meaningful in this state.
    pub const fn has_position(self) -> bool {
        matches!(self, Self::Prepared | Self::Started | Self::Paused)
    }

    /// Whether the backend knows the track duration in this state.
    pub const fn has_duration(self) -> bool {
        matches!(
            self,
            Self::Prepared | Self::Started | Self::Paused | Self::Completed
        )
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initialized => "initialized",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// A caller-issued, state-sensitive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetDataSource,
    PrepareAsync,
    Prepare,
    Start,
    Pause,
    Stop,
    Reset,
    SeekTo,
}

impl Operation {
    /// All operations.
    pub const ALL: [Self; 8] = [
        Self::SetDataSource,
        Self::PrepareAsync,
        Self::Prepare,
        Self::Start,
        Self::Pause,
        Self::Stop,
        Self::Reset,
        Self::SeekTo,
    ];

    /// The state reached when this operation is issued from `from`, or `None`
    /// if the operation is not permitted there.
    ///
    /// `SeekTo` keeps the state except from `Completed`, where it lands in `Paused`.
    pub const fn target(self, from: PlayerState) -> Option<PlayerState> {
        use PlayerState::{
            Completed, Idle, Initialized, Paused, Prepared, Preparing, Started, Stopped,
        };

        match (self, from) {
            (Self::SetDataSource, Idle) => Some(Initialized),
            (Self::PrepareAsync, Initialized | Stopped) => Some(Preparing),
            (Self::Prepare, Initialized) => Some(Preparing),
            (Self::Start, Prepared | Started | Paused | Completed) => Some(Started),
            (Self::Pause, Started | Paused) => Some(Paused),
            (Self::Stop, Started | Paused | Completed) => Some(Stopped),
            (Self::Reset, _) => Some(Idle),
            (Self::SeekTo, Prepared | Started | Paused) => Some(from),
            (Self::SeekTo, Completed) => Some(Paused),
            _ => None,
        }
    }

    /// Whether this operation is permitted from `from`.
    pub const fn is_legal(self, from: PlayerState) -> bool {
        self.target(from).is_some()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetDataSource => "set_data_source",
            Self::PrepareAsync => "prepare_async",
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::SeekTo => "seek_to",
        };
        f.write_str(name)
    }
}

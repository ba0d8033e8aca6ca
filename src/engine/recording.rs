//! Recording sessions: goal validation, 1 Hz history samplers, and delayed
//! command scheduling for the jump rope's two-phase mode setting.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::model::{DeviceCategory, RopeMode};

use super::Command;

/// Sampling period for both history recorders.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Settle time before the jump-rope mode command is repeated.
pub const ROPE_RESEND_DELAY: Duration = Duration::from_secs(1);

/// How long a completion pulse stays observable before it is reset.
pub const COMPLETION_PULSE: Duration = Duration::from_secs(1);

/// Requested jump-rope session goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeGoal {
    Free,
    /// Countdown session, target in seconds.
    Time(i32),
    /// Count-to session, target in jumps.
    Count(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("invalid time target")]
    InvalidTime,
    #[error("invalid count target")]
    InvalidCount,
    #[error("no connected device for this recording")]
    NotConnected,
}

/// Check the goal's parameters and translate it into the wire mode/setting
/// pair. Runs before anything is written to the transport, and again before
/// the delayed resend.
pub fn validate_goal(goal: RopeGoal) -> Result<(RopeMode, u32), RecordingError> {
    match goal {
        RopeGoal::Free => Ok((RopeMode::Free, 0)),
        RopeGoal::Time(secs) => {
            if secs < 0 {
                Err(RecordingError::InvalidTime)
            } else {
                Ok((RopeMode::Timed, secs as u32))
            }
        }
        RopeGoal::Count(target) => {
            if target < 0 {
                Err(RecordingError::InvalidCount)
            } else {
                Ok((RopeMode::Counted, target as u32))
            }
        }
    }
}

/// Spawn a repeating 1 Hz sampler that asks the engine to snapshot the
/// category's scalar. The tick is routed through the command channel so all
/// state access stays on the engine task; the sampler itself holds no state.
pub(crate) fn spawn_sampler(
    category: DeviceCategory,
    commands: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SAMPLE_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick of `interval` fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if commands.send(Command::SampleTick(category)).await.is_err() {
                break;
            }
        }
    })
}

/// Deliver a command back to the engine after a delay. Used for the rope
/// mode resend and for resetting completion pulses; a scheduled continuation
/// rather than a blocking sleep, so the engine keeps processing meanwhile.
pub(crate) fn schedule_command(
    delay: Duration,
    command: Command,
    commands: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = commands.send(command).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_targets_are_rejected() {
        assert_eq!(validate_goal(RopeGoal::Time(-1)), Err(RecordingError::InvalidTime));
        assert_eq!(
            validate_goal(RopeGoal::Count(-1)),
            Err(RecordingError::InvalidCount)
        );
    }

    #[test]
    fn valid_goals_map_to_wire_modes() {
        assert_eq!(validate_goal(RopeGoal::Free), Ok((RopeMode::Free, 0)));
        assert_eq!(validate_goal(RopeGoal::Time(180)), Ok((RopeMode::Timed, 180)));
        assert_eq!(validate_goal(RopeGoal::Count(0)), Ok((RopeMode::Counted, 0)));
    }
}

//! The static command table: one ASCII token per robot action.
//!
//! Tokens follow the WASD convention: `w`/`s` drive, `a`/`d` strafe,
//! `q`/`e` turn, plus posture, arm, power, and keepalive toggles. The
//! table is a single `match` built at compile time; there is nothing to
//! mutate at runtime and dispatch never does a reflective lookup.

use std::time::Duration;

use strider_types::MotionCommand;
use tokio::sync::oneshot;

/// Base linear speed for velocity commands, m/s.
pub const VELOCITY_BASE_SPEED: f32 = 0.5;

/// Base angular rate for turn commands, rad/s.
pub const VELOCITY_BASE_ANGULAR: f32 = 0.8;

/// How long one velocity command stays in effect. Long enough that held
/// keys produce continuous motion at the console's input rate, short
/// enough that one stray token cannot cause a dangerous move.
pub const VELOCITY_CMD_DURATION: Duration = Duration::from_millis(600);

/// Throttle applied between accepted tokens on the console side.
pub const COMMAND_INPUT_RATE: Duration = Duration::from_millis(100);

/// Everything a command token can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    ToggleEstop,
    ToggleLease,
    TogglePower,
    ToggleVideo,
    TakeImage,
    SelfRight,
    Sit,
    Stand,
    BatteryChangePose,
    MoveForward,
    MoveBackward,
    StrafeLeft,
    StrafeRight,
    TurnLeft,
    TurnRight,
    UnstowArm,
    StowArm,
}

/// Map one input token to its action. Unknown tokens map to `None` and
/// produce an "Unrecognized command" session message downstream.
pub fn action_for(token: char) -> Option<Action> {
    match token {
        '\t' => Some(Action::Quit),
        ' ' | 'E' => Some(Action::ToggleEstop),
        'l' => Some(Action::ToggleLease),
        'P' => Some(Action::TogglePower),
        'O' => Some(Action::ToggleVideo),
        'I' => Some(Action::TakeImage),
        'r' => Some(Action::SelfRight),
        'v' => Some(Action::Sit),
        'f' => Some(Action::Stand),
        'b' => Some(Action::BatteryChangePose),
        'w' => Some(Action::MoveForward),
        's' => Some(Action::MoveBackward),
        'a' => Some(Action::StrafeLeft),
        'd' => Some(Action::StrafeRight),
        'q' => Some(Action::TurnLeft),
        'e' => Some(Action::TurnRight),
        'u' => Some(Action::UnstowArm),
        'j' => Some(Action::StowArm),
        _ => None,
    }
}

impl Action {
    /// The fire-and-wait motion command behind this action, with its
    /// expiry. `None` for toggles, power, and quit.
    pub fn motion(self) -> Option<(MotionCommand, Option<Duration>)> {
        let velocity = |v_x: f32, v_y: f32, v_rot: f32| {
            Some((
                MotionCommand::Velocity { v_x, v_y, v_rot },
                Some(VELOCITY_CMD_DURATION),
            ))
        };
        match self {
            Action::SelfRight => Some((MotionCommand::SelfRight, None)),
            Action::Sit => Some((MotionCommand::Sit, None)),
            Action::Stand => Some((MotionCommand::Stand, None)),
            Action::BatteryChangePose => Some((MotionCommand::BatteryChangePose, None)),
            Action::MoveForward => velocity(VELOCITY_BASE_SPEED, 0.0, 0.0),
            Action::MoveBackward => velocity(-VELOCITY_BASE_SPEED, 0.0, 0.0),
            Action::StrafeLeft => velocity(0.0, VELOCITY_BASE_SPEED, 0.0),
            Action::StrafeRight => velocity(0.0, -VELOCITY_BASE_SPEED, 0.0),
            Action::TurnLeft => velocity(0.0, 0.0, VELOCITY_BASE_ANGULAR),
            Action::TurnRight => velocity(0.0, 0.0, -VELOCITY_BASE_ANGULAR),
            Action::UnstowArm => Some((MotionCommand::UnstowArm, None)),
            Action::StowArm => Some((MotionCommand::StowArm, None)),
            Action::Quit
            | Action::ToggleEstop
            | Action::ToggleLease
            | Action::TogglePower
            | Action::ToggleVideo
            | Action::TakeImage => None,
        }
    }
}

/// What the HTTP caller is told about one dispatched token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The token was handled (including the unrecognized-token case).
    Accepted,
    /// The dispatched action failed; the global failure path ran.
    Failed,
}

/// One token travelling from a console connection to the serve loop.
#[derive(Debug)]
pub struct CommandRequest {
    pub token: char,
    pub reply: oneshot::Sender<DispatchOutcome>,
}

// SPDX-License-Identifier: GPL-3.0-only

//! Controller state machine
//!
//! Every hardware callback and every controller request becomes an [`Event`].
//! [`transition`] is a pure function from the current [`Phase`] and an event
//! to the next phase plus the [`Effect`]s the controller must carry out. The
//! device and session handles live inside the phase variants, so "is the
//! device open" and "do we hold a handle" cannot disagree.
//!
//! Each open is tagged with an epoch and each configuration request with a
//! generation. A callback carrying a stale tag releases its resource instead
//! of being adopted, which keeps at most one live session at any time.

use crate::errors::CameraError;
use serde::Serialize;

/// Tag of one open attempt
pub type Epoch = u64;

/// Tag of one session configuration request
pub type Generation = u64;

/// Externally visible controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControllerState {
    Closed,
    Opening,
    Opened,
    Configuring,
    Active,
    Closing,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControllerState::Closed => "closed",
            ControllerState::Opening => "opening",
            ControllerState::Opened => "opened",
            ControllerState::Configuring => "configuring",
            ControllerState::Active => "active",
            ControllerState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Controller phase, generic over device handle `D`, session handle `S` and
/// session plan `P`
#[derive(Debug, Clone, PartialEq)]
pub enum Phase<D, S, P> {
    Closed,
    Opening {
        epoch: Epoch,
    },
    Opened {
        epoch: Epoch,
        device: D,
    },
    Configuring {
        epoch: Epoch,
        device: D,
        generation: Generation,
        plan: P,
    },
    Active {
        epoch: Epoch,
        device: D,
        session: S,
        generation: Generation,
        plan: P,
    },
    /// Teardown in progress
    Closing,
}

impl<D, S, P> Phase<D, S, P> {
    pub fn state(&self) -> ControllerState {
        match self {
            Phase::Closed => ControllerState::Closed,
            Phase::Opening { .. } => ControllerState::Opening,
            Phase::Opened { .. } => ControllerState::Opened,
            Phase::Configuring { .. } => ControllerState::Configuring,
            Phase::Active { .. } => ControllerState::Active,
            Phase::Closing => ControllerState::Closing,
        }
    }

    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Phase::Opening { epoch }
            | Phase::Opened { epoch, .. }
            | Phase::Configuring { epoch, .. }
            | Phase::Active { epoch, .. } => Some(*epoch),
            Phase::Closed | Phase::Closing => None,
        }
    }

    pub fn device(&self) -> Option<&D> {
        match self {
            Phase::Opened { device, .. } | Phase::Configuring { device, .. } | Phase::Active { device, .. } => {
                Some(device)
            }
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&S> {
        match self {
            Phase::Active { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn plan(&self) -> Option<&P> {
        match self {
            Phase::Configuring { plan, .. } | Phase::Active { plan, .. } => Some(plan),
            _ => None,
        }
    }
}

/// Inputs of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event<D, S, P> {
    /// `open` issued the asynchronous open call
    OpenRequested { epoch: Epoch },
    /// The open call failed synchronously
    OpenAborted { epoch: Epoch },
    DeviceOpened { epoch: Epoch, device: D },
    DeviceDisconnected { epoch: Epoch },
    DeviceError { epoch: Epoch, code: i32 },
    /// A new target set must be bound
    ConfigureRequested { generation: Generation, plan: P },
    SessionConfigured { generation: Generation, session: S },
    SessionConfigureFailed { generation: Generation },
    TeardownRequested,
    TeardownCompleted,
}

/// Work the controller performs after a transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect<D, S, P> {
    /// The device is ready; bind the current target set
    BeginConfiguration,
    ConfigureSession {
        device: D,
        generation: Generation,
        plan: P,
    },
    /// Commit the plan's request on the freshly adopted session
    StartStreaming { session: S, plan: P },
    CloseSession(S),
    CloseDevice(D),
    Report(CameraError),
}

/// Compute the next phase and the effects of `event`
pub fn transition<D, S, P>(phase: Phase<D, S, P>, event: Event<D, S, P>) -> (Phase<D, S, P>, Vec<Effect<D, S, P>>)
where
    D: Clone,
    S: Clone,
    P: Clone,
{
    match (phase, event) {
        (Phase::Closed, Event::OpenRequested { epoch }) => (Phase::Opening { epoch }, vec![]),

        (Phase::Opening { epoch }, Event::OpenAborted { epoch: aborted }) if epoch == aborted => {
            (Phase::Closed, vec![])
        }

        (Phase::Opening { epoch }, Event::DeviceOpened { epoch: opened, device }) if epoch == opened => {
            (Phase::Opened { epoch, device }, vec![Effect::BeginConfiguration])
        }

        // Stale open, or teardown won the race: release without adopting
        (phase, Event::DeviceOpened { device, .. }) => (phase, vec![Effect::CloseDevice(device)]),

        (Phase::Opened { epoch, device }, Event::ConfigureRequested { generation, plan }) => {
            let effects = vec![Effect::ConfigureSession {
                device: device.clone(),
                generation,
                plan: plan.clone(),
            }];
            (
                Phase::Configuring {
                    epoch,
                    device,
                    generation,
                    plan,
                },
                effects,
            )
        }

        // Supersede an in-flight configuration; its callback arrives stale
        (Phase::Configuring { epoch, device, .. }, Event::ConfigureRequested { generation, plan }) => {
            let effects = vec![Effect::ConfigureSession {
                device: device.clone(),
                generation,
                plan: plan.clone(),
            }];
            (
                Phase::Configuring {
                    epoch,
                    device,
                    generation,
                    plan,
                },
                effects,
            )
        }

        (
            Phase::Active {
                epoch, device, session, ..
            },
            Event::ConfigureRequested { generation, plan },
        ) => {
            let effects = vec![
                Effect::CloseSession(session),
                Effect::ConfigureSession {
                    device: device.clone(),
                    generation,
                    plan: plan.clone(),
                },
            ];
            (
                Phase::Configuring {
                    epoch,
                    device,
                    generation,
                    plan,
                },
                effects,
            )
        }

        (phase @ (Phase::Closed | Phase::Opening { .. } | Phase::Closing), Event::ConfigureRequested { .. }) => {
            (phase, vec![])
        }

        (
            Phase::Configuring {
                epoch,
                device,
                generation,
                plan,
            },
            Event::SessionConfigured {
                generation: configured,
                session,
            },
        ) if generation == configured => {
            let effects = vec![Effect::StartStreaming {
                session: session.clone(),
                plan: plan.clone(),
            }];
            (
                Phase::Active {
                    epoch,
                    device,
                    session,
                    generation,
                    plan,
                },
                effects,
            )
        }

        // Superseded generation or teardown: never adopt
        (phase, Event::SessionConfigured { session, .. }) => (phase, vec![Effect::CloseSession(session)]),

        (
            Phase::Configuring {
                epoch,
                device,
                generation,
                ..
            },
            Event::SessionConfigureFailed { generation: failed },
        ) if generation == failed => (
            Phase::Opened { epoch, device },
            vec![Effect::Report(CameraError::SessionConfigFailed)],
        ),

        (phase, Event::SessionConfigureFailed { .. }) => (phase, vec![]),

        (phase, Event::DeviceDisconnected { epoch }) => {
            device_lost(phase, epoch, CameraError::HardwareDisconnected)
        }

        (phase, Event::DeviceError { epoch, code }) => device_lost(phase, epoch, CameraError::DeviceError(code)),

        (Phase::Closing, Event::TeardownRequested) => (Phase::Closing, vec![]),

        (phase, Event::TeardownRequested) => (Phase::Closing, release(phase)),

        (Phase::Closing, Event::TeardownCompleted) => (Phase::Closed, vec![]),

        (phase, _) => (phase, vec![]),
    }
}

/// Release session then device held by `phase`
fn release<D, S, P>(phase: Phase<D, S, P>) -> Vec<Effect<D, S, P>> {
    match phase {
        Phase::Active { device, session, .. } => vec![Effect::CloseSession(session), Effect::CloseDevice(device)],
        Phase::Opened { device, .. } | Phase::Configuring { device, .. } => vec![Effect::CloseDevice(device)],
        Phase::Closed | Phase::Opening { .. } | Phase::Closing => vec![],
    }
}

fn device_lost<D, S, P>(
    phase: Phase<D, S, P>,
    epoch: Epoch,
    error: CameraError,
) -> (Phase<D, S, P>, Vec<Effect<D, S, P>>) {
    if phase.epoch() != Some(epoch) {
        return (phase, vec![]);
    }
    let mut effects = release(phase);
    effects.push(Effect::Report(error));
    (Phase::Closed, effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestPhase = Phase<u32, u32, &'static str>;
    type TestEffect = Effect<u32, u32, &'static str>;

    fn step(phase: TestPhase, event: Event<u32, u32, &'static str>) -> (TestPhase, Vec<TestEffect>) {
        transition(phase, event)
    }

    fn active() -> TestPhase {
        Phase::Active {
            epoch: 1,
            device: 10,
            session: 20,
            generation: 1,
            plan: "preview",
        }
    }

    #[test]
    fn test_happy_path() {
        let (phase, effects) = step(Phase::Closed, Event::OpenRequested { epoch: 1 });
        assert_eq!(phase, Phase::Opening { epoch: 1 });
        assert!(effects.is_empty());

        let (phase, effects) = step(phase, Event::DeviceOpened { epoch: 1, device: 10 });
        assert_eq!(phase, Phase::Opened { epoch: 1, device: 10 });
        assert_eq!(effects, vec![Effect::BeginConfiguration]);

        let (phase, effects) = step(
            phase,
            Event::ConfigureRequested {
                generation: 1,
                plan: "preview",
            },
        );
        assert_eq!(phase.state(), ControllerState::Configuring);
        assert_eq!(
            effects,
            vec![Effect::ConfigureSession {
                device: 10,
                generation: 1,
                plan: "preview"
            }]
        );

        let (phase, effects) = step(
            phase,
            Event::SessionConfigured {
                generation: 1,
                session: 20,
            },
        );
        assert_eq!(phase, active());
        assert_eq!(
            effects,
            vec![Effect::StartStreaming {
                session: 20,
                plan: "preview"
            }]
        );
    }

    #[test]
    fn test_device_opened_after_teardown_is_released() {
        let (phase, effects) = step(Phase::Closing, Event::DeviceOpened { epoch: 1, device: 10 });
        assert_eq!(phase, Phase::Closing);
        assert_eq!(effects, vec![Effect::CloseDevice(10)]);
    }

    #[test]
    fn test_device_opened_from_stale_epoch_is_released() {
        let (phase, effects) = step(Phase::Opening { epoch: 2 }, Event::DeviceOpened { epoch: 1, device: 10 });
        assert_eq!(phase, Phase::Opening { epoch: 2 });
        assert_eq!(effects, vec![Effect::CloseDevice(10)]);
    }

    #[test]
    fn test_reconfigure_closes_active_session_first() {
        let (phase, effects) = step(
            active(),
            Event::ConfigureRequested {
                generation: 2,
                plan: "record",
            },
        );
        assert_eq!(phase.plan(), Some(&"record"));
        assert_eq!(
            effects,
            vec![
                Effect::CloseSession(20),
                Effect::ConfigureSession {
                    device: 10,
                    generation: 2,
                    plan: "record"
                }
            ]
        );
    }

    #[test]
    fn test_superseded_session_is_never_adopted() {
        let configuring = Phase::Configuring {
            epoch: 1,
            device: 10,
            generation: 2,
            plan: "second",
        };
        let (phase, effects) = step(
            configuring.clone(),
            Event::SessionConfigured {
                generation: 1,
                session: 21,
            },
        );
        assert_eq!(phase, configuring);
        assert_eq!(effects, vec![Effect::CloseSession(21)]);
    }

    #[test]
    fn test_session_configured_after_teardown_is_released() {
        let (phase, effects) = step(
            Phase::Closing,
            Event::SessionConfigured {
                generation: 1,
                session: 20,
            },
        );
        assert_eq!(phase, Phase::Closing);
        assert_eq!(effects, vec![Effect::CloseSession(20)]);
    }

    #[test]
    fn test_configure_failure_keeps_device_open() {
        let configuring = Phase::Configuring {
            epoch: 1,
            device: 10,
            generation: 3,
            plan: "preview",
        };
        let (phase, effects) = step(configuring, Event::SessionConfigureFailed { generation: 3 });
        assert_eq!(phase, Phase::Opened { epoch: 1, device: 10 });
        assert_eq!(effects, vec![Effect::Report(CameraError::SessionConfigFailed)]);
    }

    #[test]
    fn test_stale_configure_failure_is_ignored() {
        let (phase, effects) = step(active(), Event::SessionConfigureFailed { generation: 0 });
        assert_eq!(phase, active());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_disconnect_releases_everything() {
        let (phase, effects) = step(active(), Event::DeviceDisconnected { epoch: 1 });
        assert_eq!(phase, Phase::Closed);
        assert_eq!(
            effects,
            vec![
                Effect::CloseSession(20),
                Effect::CloseDevice(10),
                Effect::Report(CameraError::HardwareDisconnected)
            ]
        );
    }

    #[test]
    fn test_device_error_while_opening() {
        let (phase, effects) = step(Phase::Opening { epoch: 4 }, Event::DeviceError { epoch: 4, code: 2 });
        assert_eq!(phase, Phase::Closed);
        assert_eq!(effects, vec![Effect::Report(CameraError::DeviceError(2))]);
    }

    #[test]
    fn test_errors_during_or_after_teardown_are_suppressed() {
        let (phase, effects) = step(Phase::Closing, Event::DeviceError { epoch: 1, code: 5 });
        assert_eq!(phase, Phase::Closing);
        assert!(effects.is_empty());

        let (phase, effects) = step(active(), Event::DeviceDisconnected { epoch: 7 });
        assert_eq!(phase, active());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (phase, effects) = step(active(), Event::TeardownRequested);
        assert_eq!(phase, Phase::Closing);
        assert_eq!(effects, vec![Effect::CloseSession(20), Effect::CloseDevice(10)]);

        let (phase, effects) = step(phase, Event::TeardownRequested);
        assert_eq!(phase, Phase::Closing);
        assert!(effects.is_empty());

        let (phase, _) = step(phase, Event::TeardownCompleted);
        assert_eq!(phase, Phase::Closed);
    }

    #[test]
    fn test_configure_without_device_is_ignored() {
        let (phase, effects) = step(
            Phase::Opening { epoch: 1 },
            Event::ConfigureRequested {
                generation: 1,
                plan: "preview",
            },
        );
        assert_eq!(phase, Phase::Opening { epoch: 1 });
        assert!(effects.is_empty());
    }
}

//! Tracks the single in-flight switch between two audio routes, and decides
//! when it is done.
//!
//! Starting a transition yields the actions needed to leave the origin and
//! enter the destination, plus a set of confirmation tokens. Once the owner
//! performed the actions, the transition resolves as soon as every token has
//! been observed, or is abandoned in favor of
//! the baseline route when a failure is signalled. A new transition always
//! supersedes the previous one.

use log::{debug, info, warn};

use crate::{
    core::address::Address,
    platform::AudioDeviceType,
};

use super::{AudioRoute, Confirmation, ConfirmationToken, RouteAction, Signal, TransitionId};

/// What the owner of the tracker must report upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// All confirmations arrived; the destination route is now in effect
    Resolved {
        /// The transition that resolved
        id: TransitionId,
        /// Its destination
        destination: AudioRoute,
    },
    /// The transition failed; switch to the baseline route, avoiding the
    /// device that failed
    FallBackToBaseline {
        /// Device the baseline selection must not pick
        exclude: Option<Address>,
    },
}

/// A transition that was just started
#[derive(Debug)]
pub struct StartedTransition {
    /// Its id
    pub id: TransitionId,
    /// Side effects to perform, in order, before calling `settle`
    pub actions: Vec<RouteAction>,
}

/// One in-flight switch
#[derive(Debug, Clone)]
pub struct PendingTransition {
    id: TransitionId,
    origin: AudioRoute,
    destination: AudioRoute,
    destination_active: bool,
    outstanding: Vec<ConfirmationToken>,
    communication_device_type: Option<AudioDeviceType>,
}

impl PendingTransition {
    /// Its id
    pub fn id(&self) -> TransitionId {
        self.id
    }

    /// The route being left
    pub fn origin(&self) -> AudioRoute {
        self.origin
    }

    /// The route being entered
    pub fn destination(&self) -> AudioRoute {
        self.destination
    }

    /// Whether audio will flow once the destination is reached
    pub fn is_destination_active(&self) -> bool {
        self.destination_active
    }

    /// Tokens not observed yet
    pub fn outstanding(&self) -> &[ConfirmationToken] {
        &self.outstanding
    }

    /// The device type last instructed to the audio service by this
    /// transition
    pub fn communication_device_type(&self) -> Option<AudioDeviceType> {
        self.communication_device_type
    }
}

/// Owns at most one `PendingTransition`
#[derive(Debug)]
pub struct TransitionTracker {
    next_id: TransitionId,
    pending: Option<PendingTransition>,
    active: bool,
}

impl TransitionTracker {
    /// Constructor. Initially no route is active.
    pub fn new() -> Self {
        Self { next_id: TransitionId(0), pending: None, active: false }
    }

    fn new_transition_id(&mut self) -> TransitionId {
        let TransitionId(id) = self.next_id;
        self.next_id = TransitionId(id.wrapping_add(1));
        TransitionId(id)
    }

    /// The in-flight transition, if any
    pub fn pending(&self) -> Option<&PendingTransition> {
        self.pending.as_ref()
    }

    /// Whether the most recently resolved route carries audio
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start switching from `origin` to `destination`, superseding any
    /// unresolved transition.
    pub fn begin(
        &mut self,
        origin: AudioRoute,
        destination: AudioRoute,
        destination_active: bool,
    ) -> StartedTransition {
        if let Some(previous) = self.pending.take() {
            info!(
                "transition {:?} to {} superseded with {} tokens outstanding",
                previous.id,
                previous.destination,
                previous.outstanding.len()
            );
        }

        let id = self.new_transition_id();
        let mut actions = vec![];
        let mut outstanding = vec![];
        let mut communication_device_type = None;
        let same_endpoint = origin == destination;

        // leave the origin
        if self.active && !same_endpoint {
            if origin.device_type == AudioDeviceType::Speaker
                && destination.device_type != AudioDeviceType::Speaker
            {
                outstanding.push(ConfirmationToken::new(Signal::SpeakerOff, None));
            }
            // switching between Bluetooth devices is handled by the state machine
            if origin.is_bluetooth() && !(destination_active && destination.is_bluetooth()) {
                actions.push(RouteAction::DisconnectBluetooth);
                outstanding.push(ConfirmationToken::new(
                    Signal::BluetoothAudioDisconnected,
                    origin.address,
                ));
            }
            if !destination_active {
                actions.push(RouteAction::ClearCommunicationDevice);
            }
        }

        // enter the destination
        if destination_active && !(same_endpoint && self.active) {
            if destination.is_bluetooth() {
                actions.push(RouteAction::ConnectBluetooth(destination.address));
                outstanding.push(ConfirmationToken::new(
                    Signal::BluetoothAudioConnected,
                    destination.address,
                ));
                outstanding.push(ConfirmationToken::new(
                    Signal::CommunicationDeviceChanged,
                    destination.address,
                ));
            } else {
                actions.push(RouteAction::SetCommunicationDevice(destination.device_type));
                if destination.device_type == AudioDeviceType::Speaker {
                    outstanding.push(ConfirmationToken::new(Signal::SpeakerOn, None));
                }
            }
            communication_device_type = Some(destination.device_type);
        }

        debug!(
            "transition {:?}: {} -> {} (active={}), actions {:?}, awaiting {:?}",
            id, origin, destination, destination_active, actions, outstanding
        );

        self.pending = Some(PendingTransition {
            id,
            origin,
            destination,
            destination_active,
            outstanding,
            communication_device_type,
        });

        StartedTransition { id, actions }
    }

    /// Resolve the pending transition if nothing is outstanding. Called once
    /// its actions were performed, for transitions that need no signal.
    pub fn settle(&mut self) -> Option<TransitionOutcome> {
        self.resolve_if_done()
    }

    /// Record an observed signal. Returns `Resolved` the one time the last
    /// outstanding token is observed.
    pub fn on_confirmation(&mut self, confirmation: Confirmation) -> Option<TransitionOutcome> {
        let Some(pending) = self.pending.as_mut() else {
            debug!("no pending transition, dropping {:?}", confirmation.token);
            return None;
        };

        if let Some(tagged) = confirmation.transition {
            if tagged != pending.id {
                debug!("dropping {:?} for superseded transition {:?}", confirmation.token, tagged);
                return None;
            }
        }

        let Some(index) =
            pending.outstanding.iter().position(|t| t.is_satisfied_by(&confirmation.token))
        else {
            debug!("{:?} is not awaited by transition {:?}", confirmation.token, pending.id);
            return None;
        };
        pending.outstanding.swap_remove(index);

        self.resolve_if_done()
    }

    /// Abandon the pending transition because its destination failed.
    /// `failed` names the device at fault, if known; otherwise the
    /// destination's own address is excluded.
    pub fn on_failure_signal(&mut self, failed: Option<Address>) -> Option<TransitionOutcome> {
        let Some(pending) = self.pending.take() else {
            debug!("failure signalled without a pending transition");
            return None;
        };

        warn!(
            "transition {:?} to {} failed with {:?} outstanding, falling back to baseline",
            pending.id, pending.destination, pending.outstanding
        );
        Some(TransitionOutcome::FallBackToBaseline {
            exclude: failed.or(pending.destination.address),
        })
    }

    /// The deadline of transition `id` passed. Falls back to baseline if it
    /// is still pending; a stale deadline is ignored.
    pub fn on_timeout(&mut self, id: TransitionId) -> Option<TransitionOutcome> {
        if self.pending.as_ref()?.id != id {
            debug!("ignoring timeout of finished transition {:?}", id);
            return None;
        }
        warn!("transition {:?} timed out", id);
        self.on_failure_signal(None)
    }

    /// Whether the pending transition still waits for a signal matching
    /// `observed`
    pub fn is_awaiting(&self, observed: &ConfirmationToken) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.outstanding.iter().any(|t| t.is_satisfied_by(observed)))
    }

    /// Drop the pending transition without reporting anything
    pub fn abandon(&mut self) -> Option<PendingTransition> {
        self.pending.take()
    }

    fn resolve_if_done(&mut self) -> Option<TransitionOutcome> {
        if !self.pending.as_ref()?.outstanding.is_empty() {
            return None;
        }

        let resolved = self.pending.take()?;
        self.active = resolved.destination_active;
        info!("transition {:?} resolved, now on {}", resolved.id, resolved.destination);
        Some(TransitionOutcome::Resolved { id: resolved.id, destination: resolved.destination })
    }
}

impl Default for TransitionTracker {
    fn default() -> Self {
        Self::new()
    }
}

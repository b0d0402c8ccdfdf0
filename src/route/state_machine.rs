use std::fmt::{Display, Formatter, Result};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    callbacks::RouteListener,
    config::{TimeoutsProvider, MAX_CONNECTION_RETRIES},
    core::{
        address::Address,
        device::{Device, Profile},
        local_log::LocalLog,
    },
    registry::DeviceRegistry,
    utils::owned_handle::{send_delayed, OwnedHandle},
};

use super::Message;

/// Where Bluetooth call audio is, as far as the state machine knows
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteState {
    /// No Bluetooth audio
    AudioOff,
    /// Audio requested towards a device, waiting for it to come up
    Connecting(Address),
    /// Audio flowing to a device
    Connected(Address),
}

impl RouteState {
    /// The device of a `Connecting` or `Connected` state
    pub fn live_address(&self) -> Option<Address> {
        match self {
            RouteState::AudioOff => None,
            RouteState::Connecting(address) | RouteState::Connected(address) => Some(*address),
        }
    }

    /// Whether audio is up or on its way
    pub fn is_connected_or_pending(&self) -> bool {
        *self != RouteState::AudioOff
    }
}

impl Display for RouteState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            RouteState::AudioOff => write!(f, "AudioOff"),
            RouteState::Connecting(address) => write!(f, "Connecting({:?})", address),
            RouteState::Connected(address) => write!(f, "Connected({:?})", address),
        }
    }
}

/// What a connect request led to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The target already carries audio; listeners were told again
    Reaffirmed(Address),
    /// A connection to the target is already in progress
    AlreadyConnecting(Address),
    /// The stack accepted the request
    Started(Address),
    /// The stack rejected the request; a retry may be scheduled
    Rejected(Address),
    /// No connected device to send audio to
    NoDevice,
}

/// Decides which device Bluetooth call audio should be on, and drives the
/// registry to get it there. Owned by the route thread; every method runs
/// there.
pub struct RouteStateMachine {
    state: RouteState,
    registry: Arc<DeviceRegistry>,
    listener: Arc<dyn RouteListener>,
    timeouts: Arc<dyn TimeoutsProvider>,
    tx: UnboundedSender<Message>,
    retry: Option<OwnedHandle<()>>,
    connection_timeout: Option<OwnedHandle<()>>,
    most_recently_used: Vec<Address>,
    log: LocalLog,
}

impl RouteStateMachine {
    /// Constructor. Starts in `AudioOff`.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        listener: Arc<dyn RouteListener>,
        timeouts: Arc<dyn TimeoutsProvider>,
        tx: UnboundedSender<Message>,
        log_capacity: usize,
    ) -> Self {
        Self {
            state: RouteState::AudioOff,
            registry,
            listener,
            timeouts,
            tx,
            retry: None,
            connection_timeout: None,
            most_recently_used: vec![],
            log: LocalLog::new(log_capacity),
        }
    }

    /// The current state
    pub fn state(&self) -> RouteState {
        self.state
    }

    /// Devices that carried audio, most recent last
    pub fn most_recently_used(&self) -> &[Address] {
        &self.most_recently_used
    }

    /// Whether a retry is scheduled
    pub fn has_scheduled_retry(&self) -> bool {
        self.retry.as_ref().is_some_and(|retry| !retry.is_finished())
    }

    /// The rolling transition log
    pub fn log(&self) -> &LocalLog {
        &self.log
    }

    /// A profile connected a device
    pub fn on_device_added(&mut self, device: Device, profile: Profile) {
        let address = device.address;
        match self.registry.on_device_connected(device, profile) {
            Ok(true) => self.listener.on_device_list_changed(),
            Ok(false) => {}
            Err(e) => warn!("{:?} not added over {}: {:?}", address, profile, e),
        }
    }

    /// A profile disconnected a device. Losing the live device moves the
    /// state to what the platform reports.
    pub async fn on_device_lost(&mut self, address: Address, profile: Profile) {
        if !self.registry.on_device_disconnected(address, profile) {
            return;
        }
        self.listener.on_device_list_changed();

        if self.registry.is_connected(address) {
            return;
        }
        self.most_recently_used.retain(|a| *a != address);
        if self.state.live_address() == Some(address) {
            info!("lost live device {:?}", address);
            self.transition_to_actual_state().await;
        }
    }

    /// The stack changed the active device of a profile
    pub fn on_active_device_changed(&mut self, profile: Profile, address: Option<Address>) {
        debug!("active {} device is now {:?}", profile, address);
        match self.registry.on_active_device_changed(profile, address) {
            (false, true) => self.listener.on_active_device_present(),
            (true, false) => self.listener.on_active_device_gone(),
            _ => {}
        }
    }

    /// Handle a connect request. `attempt` is 0 for a new request and
    /// counts scheduled retries.
    pub async fn connect(&mut self, requested: Option<Address>, attempt: u32) -> ConnectOutcome {
        if attempt == 0 {
            self.retry = None;
        }

        let Some(target) =
            self.registry.resolve_connect_target(requested, &self.most_recently_used)
        else {
            warn!("no devices available for audio (requested {:?})", requested);
            self.log.log(format!("connect {:?}: no devices available", requested));
            let _ = self.tx.send(Message::TransitionFailed(requested));
            return ConnectOutcome::NoDevice;
        };

        match self.state {
            RouteState::Connected(address) if address == target => {
                info!("already connected to {:?}, not connecting again", target);
                self.listener.on_audio_connected(target);
                return ConnectOutcome::Reaffirmed(target);
            }
            RouteState::Connecting(address) if address == target => {
                debug!("already connecting to {:?}", target);
                return ConnectOutcome::AlreadyConnecting(target);
            }
            _ => {}
        }

        let switching_devices = self.state.live_address().is_some_and(|a| a != target);
        if switching_devices {
            info!("switching audio from {} to {:?}", self.state, target);
            self.registry.disconnect_audio().await;
        }

        match self.registry.connect_audio(target, switching_devices).await {
            Ok(()) => {
                self.listener.on_audio_connecting(target);
                self.transition(RouteState::Connecting(target));
                ConnectOutcome::Started(target)
            }
            Err(failure) => {
                self.log.log(format!("connect {:?} attempt {} failed: {:?}", target, attempt, failure));
                if attempt < MAX_CONNECTION_RETRIES {
                    let next = attempt + 1;
                    let delay = self.timeouts.retry_backoff(next);
                    info!("retrying connection to {:?} in {:?} (attempt {})", target, delay, next);
                    self.retry = Some(send_delayed(
                        self.tx.clone(),
                        Message::RetryConnect(target, next),
                        delay,
                    ));
                } else {
                    warn!("giving up on {:?} after {} retries", target, attempt);
                    self.retry = None;
                    let _ = self.tx.send(Message::TransitionFailed(Some(target)));
                }
                ConnectOutcome::Rejected(target)
            }
        }
    }

    /// A scheduled retry came due
    pub async fn retry_connect(&mut self, address: Address, attempt: u32) -> Option<ConnectOutcome> {
        if self.state.live_address() == Some(address) {
            debug!("ignoring retry {} for live device {:?}", attempt, address);
            return None;
        }
        if attempt > MAX_CONNECTION_RETRIES {
            warn!("dropping retry {} for {:?}", attempt, address);
            return None;
        }
        Some(self.connect(Some(address), attempt).await)
    }

    /// Tear down audio. The resulting audio-lost event moves the state.
    pub async fn disconnect(&mut self) {
        self.retry = None;
        self.log.log(format!("disconnect requested in {}", self.state));
        self.registry.disconnect_audio().await;
    }

    /// A `Connecting` state waited too long; stale timeouts are ignored
    pub async fn on_connection_timeout(&mut self, address: Address) {
        if self.state != RouteState::Connecting(address) {
            debug!("stale connection timeout for {:?} in {}", address, self.state);
            return;
        }
        warn!("timed out connecting to {:?}", address);
        self.log.log(format!("connection to {:?} timed out", address));
        self.transition_to_actual_state().await;
    }

    /// Audio came up on `address`. The platform is trusted even if another
    /// device was expected.
    pub fn on_audio_on(&mut self, address: Address) {
        match self.state.live_address() {
            Some(live) if live == address => {}
            Some(live) if self.registry.is_connected(address) => {
                warn!("audio came up on {:?} instead of {:?}", address, live);
            }
            None if self.registry.is_connected(address) => {
                info!("platform brought audio up on {:?}", address);
            }
            _ => {
                warn!("audio on for unknown device {:?}, ignoring", address);
                return;
            }
        }
        self.transition(RouteState::Connected(address));
    }

    /// Audio went down. Loss of a device other than the live one is
    /// reported as unexpected and leaves the state alone.
    pub async fn on_audio_lost(&mut self, address: Option<Address>) {
        match (address, self.state.live_address()) {
            (None, _) => self.transition_to_actual_state().await,
            (Some(address), Some(live)) if address == live => {
                self.transition_to_actual_state().await
            }
            (Some(address), _) => {
                warn!("audio lost for {:?} while {}", address, self.state);
                self.log.log(format!("unexpected audio loss for {:?} in {}", address, self.state));
                self.listener.on_unexpected_state_change();
            }
        }
    }

    /// Move to whatever the platform reports as actually carrying audio
    async fn transition_to_actual_state(&mut self) {
        match self.registry.audio_connected_device().await {
            Some(address) => self.transition(RouteState::Connected(address)),
            None => self.transition(RouteState::AudioOff),
        }
    }

    fn transition(&mut self, next: RouteState) {
        if next == self.state {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        self.retry = None;
        self.connection_timeout = None;
        info!("route state {} -> {}", previous, next);
        self.log.log(format!("{} -> {}", previous, next));

        match next {
            RouteState::AudioOff => self.listener.on_audio_disconnected(),
            RouteState::Connecting(address) => {
                self.connection_timeout = Some(send_delayed(
                    self.tx.clone(),
                    Message::ConnectionTimeout(address),
                    self.timeouts.connection_timeout(),
                ));
            }
            RouteState::Connected(address) => {
                self.most_recently_used.retain(|a| *a != address);
                self.most_recently_used.push(address);
                self.listener.on_audio_connected(address);
                if !self.registry.set_communication_device_for(address) {
                    warn!("{:?} carries audio but is not the communication device", address);
                    let _ = self.tx.send(Message::TransitionFailed(Some(address)));
                }
            }
        }
    }
}

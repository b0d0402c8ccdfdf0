//! The route thread: one task that owns the route state machine and the
//! transition tracker, and processes every route-affecting message in
//! arrival order.
//!
//! Other threads talk to it through a `RouteProxy`, or an `EventDispatcher`
//! for platform events.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tokio::time::timeout;

use crate::{
    callbacks::{RouteListener, TransitionListener},
    config::{RouteConfig, TimeoutsProvider, QUERY_TIMEOUT},
    core::{
        address::Address,
        device::{Device, Profile},
    },
    events::EventDispatcher,
    platform::{AudioDeviceType, AudioManager, BluetoothAdapter},
    registry::DeviceRegistry,
    transition::{
        pending::{TransitionOutcome, TransitionTracker},
        AudioRoute, Confirmation, ConfirmationToken, RouteAction, Signal, TransitionId,
    },
    utils::owned_handle::{send_delayed, OwnedHandle},
};

pub mod state_machine;

use state_machine::{ConnectOutcome, RouteState, RouteStateMachine};

/// Enum of all the messages the route thread handles
#[derive(Debug)]
pub enum Message {
    /// A profile connected a device
    DeviceAdded(Device, Profile),
    /// A profile disconnected a device
    DeviceLost(Address, Profile),
    /// The stack changed the active device of a profile
    ActiveDeviceChanged(Profile, Option<Address>),
    /// Bring Bluetooth audio up, to the given device or the best candidate
    Connect(Option<Address>),
    /// Scheduled retry of a rejected connect, with its attempt number
    RetryConnect(Address, u32),
    /// Tear Bluetooth audio down
    Disconnect,
    /// A `Connecting` state waited too long
    ConnectionTimeout(Address),
    /// Audio came up on a device
    AudioOn(Address),
    /// Audio went down, on a device or on whatever carried it
    AudioLost(Option<Address>),
    /// Start switching routes
    BeginTransition {
        /// Route being left
        origin: AudioRoute,
        /// Route being entered
        destination: AudioRoute,
        /// Whether audio flows once `destination` is reached
        destination_active: bool,
        /// Receives the id of the new transition
        reply: oneshot::Sender<TransitionId>,
    },
    /// A signal a transition may be waiting for
    Confirmation(Confirmation),
    /// The pending transition cannot complete; the device at fault if known
    TransitionFailed(Option<Address>),
    /// A transition's confirmations did not all arrive in time
    TransitionTimeout(TransitionId),
    /// Abandon any transition and fall back to the baseline route
    SwitchToBaseline(Option<Address>),
    /// Whether Bluetooth audio is connected or connecting
    QueryConnectedOrPending(oneshot::Sender<bool>),
    /// The state machine's current state
    GetState(oneshot::Sender<RouteState>),
    /// Diagnostics
    Dump(oneshot::Sender<Vec<String>>),
    /// Answered once every earlier message was processed
    Sync(oneshot::Sender<()>),
}

/// The collaborators the route thread is built from
pub struct Collaborators {
    /// Adapter-level operations
    pub adapter: Arc<dyn BluetoothAdapter>,
    /// System audio-routing service
    pub audio_manager: Arc<dyn AudioManager>,
    /// Timeout policy
    pub timeouts: Arc<dyn TimeoutsProvider>,
    /// Told about device and audio state
    pub route_listener: Arc<dyn RouteListener>,
    /// Told about transition outcomes
    pub transition_listener: Arc<dyn TransitionListener>,
}

/// Owns the route state machine and the transition tracker, and keeps the
/// two in step
pub struct RouteCoordinator {
    state_machine: RouteStateMachine,
    tracker: TransitionTracker,
    registry: Arc<DeviceRegistry>,
    audio_manager: Arc<dyn AudioManager>,
    transition_listener: Arc<dyn TransitionListener>,
    timeouts: Arc<dyn TimeoutsProvider>,
    tx: UnboundedSender<Message>,
    transition_timeout: Option<OwnedHandle<()>>,
}

impl RouteCoordinator {
    /// Handle one message
    pub async fn handle(&mut self, message: Message) {
        let before = self.state_machine.state();

        match message {
            Message::DeviceAdded(device, profile) => {
                self.state_machine.on_device_added(device, profile)
            }
            Message::DeviceLost(address, profile) => {
                self.state_machine.on_device_lost(address, profile).await
            }
            Message::ActiveDeviceChanged(profile, address) => {
                self.state_machine.on_active_device_changed(profile, address)
            }
            Message::Connect(address) => {
                let outcome = self.state_machine.connect(address, 0).await;
                self.on_connect_outcome(outcome);
            }
            Message::RetryConnect(address, attempt) => {
                if let Some(outcome) = self.state_machine.retry_connect(address, attempt).await {
                    self.on_connect_outcome(outcome);
                }
            }
            Message::Disconnect => self.state_machine.disconnect().await,
            Message::ConnectionTimeout(address) => {
                self.state_machine.on_connection_timeout(address).await
            }
            Message::AudioOn(address) => self.state_machine.on_audio_on(address),
            Message::AudioLost(address) => self.state_machine.on_audio_lost(address).await,
            Message::BeginTransition { origin, destination, destination_active, reply } => {
                let id = self.begin_transition(origin, destination, destination_active).await;
                let _ = reply.send(id);
                self.clear_stale_transition_timeout();
                return;
            }
            Message::Confirmation(confirmation) => {
                let outcome = self.tracker.on_confirmation(confirmation);
                self.report(outcome);
            }
            Message::TransitionFailed(address) => {
                let outcome = self.tracker.on_failure_signal(address);
                self.report(outcome);
            }
            Message::TransitionTimeout(id) => {
                let outcome = self.tracker.on_timeout(id);
                self.report(outcome);
            }
            Message::SwitchToBaseline(exclude) => {
                if let Some(abandoned) = self.tracker.abandon() {
                    info!("abandoning transition {:?} for baseline", abandoned.id());
                }
                self.transition_listener.on_switch_to_baseline(exclude);
            }
            Message::QueryConnectedOrPending(tx) => {
                let _ = tx.send(self.state_machine.state().is_connected_or_pending());
            }
            Message::GetState(tx) => {
                let _ = tx.send(self.state_machine.state());
            }
            Message::Dump(tx) => {
                let _ = tx.send(self.dump());
            }
            Message::Sync(tx) => {
                let _ = tx.send(());
            }
        }

        self.on_state_changed(before);
        self.clear_stale_transition_timeout();
    }

    async fn begin_transition(
        &mut self,
        origin: AudioRoute,
        destination: AudioRoute,
        destination_active: bool,
    ) -> TransitionId {
        let started = self.tracker.begin(origin, destination, destination_active);
        self.transition_timeout = Some(send_delayed(
            self.tx.clone(),
            Message::TransitionTimeout(started.id),
            self.timeouts.transition_timeout(),
        ));
        for action in started.actions {
            let before = self.state_machine.state();
            self.perform(action).await;
            self.on_state_changed(before);
        }
        let outcome = self.tracker.settle();
        self.report(outcome);
        started.id
    }

    /// The deadline lives only as long as the transition it guards
    fn clear_stale_transition_timeout(&mut self) {
        if self.tracker.pending().is_none() {
            self.transition_timeout = None;
        }
    }

    async fn perform(&mut self, action: RouteAction) {
        debug!("performing {:?}", action);
        match action {
            RouteAction::ConnectBluetooth(address) => {
                let outcome = self.state_machine.connect(address, 0).await;
                self.on_connect_outcome(outcome);
            }
            RouteAction::DisconnectBluetooth => self.state_machine.disconnect().await,
            RouteAction::SetCommunicationDevice(device_type) => {
                self.set_communication_device(device_type)
            }
            RouteAction::ClearCommunicationDevice => {
                self.audio_manager.clear_communication_device()
            }
        }
    }

    fn set_communication_device(&mut self, device_type: AudioDeviceType) {
        let candidate = self
            .audio_manager
            .available_communication_devices()
            .into_iter()
            .find(|info| info.device_type == device_type);
        let accepted = match candidate {
            Some(info) => self.audio_manager.set_communication_device(&info),
            None => {
                warn!("no {:?} communication device available", device_type);
                false
            }
        };
        if !accepted {
            let outcome = self.tracker.on_failure_signal(None);
            self.report(outcome);
        }
    }

    /// A reaffirmed device produces no new hardware events, so its
    /// confirmations are taken from the current state.
    fn on_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let ConnectOutcome::Reaffirmed(address) = outcome else {
            return;
        };
        self.confirm(Signal::BluetoothAudioConnected, address);
        if self.registry.communication_device().is_some_and(|(a, _)| a == address) {
            self.confirm(Signal::CommunicationDeviceChanged, address);
        }
    }

    fn on_state_changed(&mut self, before: RouteState) {
        let after = self.state_machine.state();
        if before == after {
            return;
        }

        if let RouteState::Connected(left) = before {
            self.confirm(Signal::BluetoothAudioDisconnected, left);
        }
        if let RouteState::Connected(entered) = after {
            self.confirm(Signal::BluetoothAudioConnected, entered);
        }

        // audio ended up anywhere but on the device being connected
        if let RouteState::Connecting(attempted) = before {
            let awaited = ConfirmationToken::new(Signal::BluetoothAudioConnected, Some(attempted));
            if after != RouteState::Connected(attempted) && self.tracker.is_awaiting(&awaited) {
                let outcome = self.tracker.on_failure_signal(Some(attempted));
                self.report(outcome);
            }
        }
    }

    /// Confirmations observed here are tagged with the transition they were
    /// observed for
    fn confirm(&mut self, signal: Signal, address: Address) {
        let Some(id) = self.tracker.pending().map(|pending| pending.id()) else {
            return;
        };
        let confirmation = Confirmation {
            transition: Some(id),
            token: ConfirmationToken::new(signal, Some(address)),
        };
        let outcome = self.tracker.on_confirmation(confirmation);
        self.report(outcome);
    }

    fn report(&self, outcome: Option<TransitionOutcome>) {
        match outcome {
            Some(TransitionOutcome::Resolved { destination, .. }) => {
                self.transition_listener.on_route_active(destination)
            }
            Some(TransitionOutcome::FallBackToBaseline { exclude }) => {
                self.transition_listener.on_switch_to_baseline(exclude)
            }
            None => {}
        }
    }

    fn dump(&self) -> Vec<String> {
        let mut out = vec![format!("state: {}", self.state_machine.state())];
        match self.tracker.pending() {
            Some(pending) => out.push(format!(
                "pending transition {:?}: {} -> {}, awaiting {:?}",
                pending.id(),
                pending.origin(),
                pending.destination(),
                pending.outstanding()
            )),
            None => out.push(format!("no pending transition, active={}", self.tracker.is_active())),
        }
        out.push(format!("most recently used: {:?}", self.state_machine.most_recently_used()));
        out.extend(self.registry.dump());
        out.push("history:".to_string());
        out.extend(self.state_machine.log().entries());
        out
    }
}

/// Everything needed to run the route thread. Create it, hand out proxies,
/// then move it into `mainloop`.
pub struct RouteContext {
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
    registry: Arc<DeviceRegistry>,
    coordinator: RouteCoordinator,
}

impl RouteContext {
    /// Constructor
    pub fn new(config: &RouteConfig, collaborators: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(DeviceRegistry::new(
            collaborators.adapter,
            collaborators.audio_manager.clone(),
            tx.clone(),
            config.headset_bind_timeout,
        ));
        let state_machine = RouteStateMachine::new(
            registry.clone(),
            collaborators.route_listener,
            collaborators.timeouts.clone(),
            tx.clone(),
            config.local_log_capacity,
        );
        let coordinator = RouteCoordinator {
            state_machine,
            tracker: TransitionTracker::new(),
            registry: registry.clone(),
            audio_manager: collaborators.audio_manager,
            transition_listener: collaborators.transition_listener,
            timeouts: collaborators.timeouts,
            tx: tx.clone(),
            transition_timeout: None,
        };
        RouteContext { tx, rx, registry, coordinator }
    }

    /// The registry, for binding profile services
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Handle for the call-audio layer
    pub fn get_proxy(&self) -> RouteProxy {
        RouteProxy { tx: self.tx.clone() }
    }

    /// Handle for platform event callbacks
    pub fn get_dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.tx.clone(), self.registry.clone())
    }
}

/// Process messages until every sender is gone
pub async fn mainloop(context: RouteContext) {
    let RouteContext { mut rx, mut coordinator, .. } = context;

    loop {
        let m = rx.recv().await;

        let Some(m) = m else {
            info!("Exiting route mainloop");
            break;
        };

        debug!("Message handler: {:?}", m);
        coordinator.handle(m).await;
    }
}

/// Cloneable handle posting to the route thread. Never blocks, except for
/// queries which wait at most `QUERY_TIMEOUT`.
#[derive(Clone)]
pub struct RouteProxy {
    tx: UnboundedSender<Message>,
}

impl RouteProxy {
    fn post(&self, message: Message) {
        if self.tx.send(message).is_err() {
            warn!("route thread is gone, dropping message");
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.post(make(tx));
        match timeout(QUERY_TIMEOUT, rx).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => {
                warn!("route thread dropped a query");
                None
            }
            Err(_) => {
                warn!("route query timed out after {:?}, route thread may be stalled", QUERY_TIMEOUT);
                None
            }
        }
    }

    /// Bring Bluetooth audio up, to `address` or the best candidate
    pub fn connect_audio(&self, address: Option<Address>) {
        self.post(Message::Connect(address));
    }

    /// Tear Bluetooth audio down
    pub fn disconnect_audio(&self) {
        self.post(Message::Disconnect);
    }

    /// Abandon any transition; the baseline route should avoid `exclude`
    pub fn switch_to_baseline(&self, exclude: Option<Address>) {
        self.post(Message::SwitchToBaseline(exclude));
    }

    /// Start switching from `origin` to `destination`. Returns the id to
    /// tag confirmations for this transition with, or `None` if the route
    /// thread does not answer in time.
    pub async fn begin_transition(
        &self,
        origin: AudioRoute,
        destination: AudioRoute,
        destination_active: bool,
    ) -> Option<TransitionId> {
        self.query(|reply| Message::BeginTransition {
            origin,
            destination,
            destination_active,
            reply,
        })
        .await
    }

    /// Report a signal a transition may be waiting for
    pub fn confirm(&self, confirmation: Confirmation) {
        self.post(Message::Confirmation(confirmation));
    }

    /// Whether Bluetooth audio is connected or being connected. False if
    /// the route thread does not answer in time.
    pub async fn is_bluetooth_audio_connected_or_pending(&self) -> bool {
        self.query(Message::QueryConnectedOrPending).await.unwrap_or(false)
    }

    /// The state machine's current state, if the route thread answers
    pub async fn state(&self) -> Option<RouteState> {
        self.query(Message::GetState).await
    }

    /// Current state, pending transition, devices and recent history
    pub async fn dump(&self) -> Vec<String> {
        self.query(Message::Dump).await.unwrap_or_default()
    }

    /// Wait until every message posted before this call was processed.
    /// Returns false if the route thread did not get there in time.
    pub async fn sync(&self) -> bool {
        self.query(Message::Sync).await.is_some()
    }

    /// The raw sender, for posting other messages
    pub fn get_tx(&self) -> UnboundedSender<Message> {
        self.tx.clone()
    }
}

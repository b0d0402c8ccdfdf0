//! Normalizes platform notifications into route thread messages.
//!
//! Platform callbacks arrive on arbitrary threads; the dispatcher only ever
//! posts to the route thread's queue, so none of its methods block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    core::{
        address::Address,
        device::{Device, Profile},
    },
    platform::{AudioDeviceInfo, AudioDeviceType, ScoAudioState},
    registry::{DeviceRegistry, ProfileService},
    route::Message,
    transition::{Confirmation, Signal},
};

/// Profile connection state, discriminants as broadcast by the platform
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// A notification from the platform Bluetooth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// A profile's connection to a device changed
    ConnectionStateChanged { profile: Profile, device: Device, state: ConnectionState },
    /// The stack picked a new active device for a profile
    ActiveDeviceChanged { profile: Profile, address: Option<Address> },
    /// SCO to a headset changed
    ScoAudioStateChanged { address: Address, state: ScoAudioState },
}

impl PlatformEvent {
    /// Build a connection state event from raw platform values
    pub fn connection_state_from_raw(profile: u32, device: Device, state: u32) -> Option<Self> {
        Some(PlatformEvent::ConnectionStateChanged {
            profile: Profile::from_u32(profile)?,
            device,
            state: ConnectionState::from_u32(state)?,
        })
    }

    /// Build a SCO state event from raw platform values
    pub fn sco_state_from_raw(address: Address, state: u32) -> Option<Self> {
        Some(PlatformEvent::ScoAudioStateChanged {
            address,
            state: ScoAudioState::from_u32(state)?,
        })
    }
}

/// Turns platform notifications into messages for the route thread
pub struct EventDispatcher {
    tx: UnboundedSender<Message>,
    registry: Arc<DeviceRegistry>,
    in_call: AtomicBool,
    communication_device_type: Mutex<Option<AudioDeviceType>>,
}

impl EventDispatcher {
    /// Constructor
    pub fn new(tx: UnboundedSender<Message>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            tx,
            registry,
            in_call: AtomicBool::new(false),
            communication_device_type: Mutex::new(None),
        }
    }

    fn post(&self, message: Message) {
        if self.tx.send(message).is_err() {
            warn!("route thread is gone, dropping platform event");
        }
    }

    /// Whether a call is in progress. Hearing aid and LE Audio devices
    /// becoming active only means audio is on while it is.
    pub fn set_in_call(&self, in_call: bool) {
        self.in_call.store(in_call, Ordering::SeqCst);
    }

    /// Handle a Bluetooth layer notification
    pub fn on_platform_event(&self, event: PlatformEvent) {
        debug!("platform event {:?}", event);
        match event {
            PlatformEvent::ConnectionStateChanged { profile, device, state } => match state {
                ConnectionState::Connected => self.post(Message::DeviceAdded(device, profile)),
                ConnectionState::Disconnected => {
                    self.post(Message::DeviceLost(device.address, profile))
                }
                ConnectionState::Connecting | ConnectionState::Disconnecting => {}
            },
            PlatformEvent::ActiveDeviceChanged { profile, address } => {
                self.post(Message::ActiveDeviceChanged(profile, address));
                if profile == Profile::ClassicHeadset {
                    // SCO state events carry HFP audio
                    return;
                }
                match address {
                    Some(address) if self.in_call.load(Ordering::SeqCst) => {
                        self.post(Message::AudioOn(address))
                    }
                    Some(_) => {}
                    None => self.post(Message::AudioLost(None)),
                }
            }
            PlatformEvent::ScoAudioStateChanged { address, state } => match state {
                ScoAudioState::Connected => self.post(Message::AudioOn(address)),
                ScoAudioState::Disconnected => self.post(Message::AudioLost(Some(address))),
                ScoAudioState::Connecting => {}
            },
        }
    }

    /// The audio service switched its communication device
    pub fn on_communication_device_changed(&self, device: Option<AudioDeviceInfo>) {
        let device_type = device.map(|d| d.device_type);
        let previous = {
            let mut current =
                self.communication_device_type.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, device_type)
        };
        debug!("communication device {:?} -> {:?}", previous, device);

        if let Some(address) = device.and_then(|d| d.address) {
            self.post(Message::Confirmation(Confirmation::untagged(
                Signal::CommunicationDeviceChanged,
                Some(address),
            )));
        }

        let speaker = Some(AudioDeviceType::Speaker);
        if device_type == speaker && previous != speaker {
            self.post(Message::Confirmation(Confirmation::untagged(Signal::SpeakerOn, None)));
        } else if previous == speaker && device_type != speaker {
            self.post(Message::Confirmation(Confirmation::untagged(Signal::SpeakerOff, None)));
        }
    }

    /// A profile service attached
    pub fn on_service_connected(&self, service: ProfileService) {
        self.registry.on_service_connected(service);
    }

    /// A profile service detached; its devices are reported lost
    pub fn on_service_disconnected(&self, profile: Profile) {
        for address in self.registry.on_service_disconnected(profile) {
            self.post(Message::DeviceLost(address, profile));
        }
    }
}

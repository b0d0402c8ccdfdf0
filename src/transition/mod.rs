//! Route endpoints, and the vocabulary used to confirm that a switch between
//! two of them has completed.

use std::fmt::{Display, Formatter, Result};

use crate::{core::address::Address, platform::AudioDeviceType};

pub mod pending;

/// A logical audio destination: a device type, plus an address for
/// Bluetooth endpoints.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AudioRoute {
    /// Kind of endpoint
    pub device_type: AudioDeviceType,
    /// Which Bluetooth device, if `device_type` is a Bluetooth type. `None`
    /// lets the state machine pick one.
    pub address: Option<Address>,
}

impl AudioRoute {
    /// A built-in or wired endpoint
    pub const fn new(device_type: AudioDeviceType) -> Self {
        Self { device_type, address: None }
    }

    /// A Bluetooth endpoint
    pub const fn bluetooth(device_type: AudioDeviceType, address: Address) -> Self {
        Self { device_type, address: Some(address) }
    }

    /// Whether audio for this endpoint flows over Bluetooth
    pub fn is_bluetooth(&self) -> bool {
        self.device_type.profile().is_some()
    }
}

impl Display for AudioRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.address {
            Some(address) => write!(f, "{:?}({:?})", self.device_type, address),
            None => write!(f, "{:?}", self.device_type),
        }
    }
}

/// Asynchronous signals a pending transition may wait for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Bluetooth audio to a device came up
    BluetoothAudioConnected,
    /// Bluetooth audio to a device went down
    BluetoothAudioDisconnected,
    /// The audio service switched its communication device
    CommunicationDeviceChanged,
    /// The loudspeaker became the communication device
    SpeakerOn,
    /// The loudspeaker stopped being the communication device
    SpeakerOff,
}

/// One expected signal. An outstanding token without an address is
/// satisfied by the signal for any address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationToken {
    /// The signal
    pub signal: Signal,
    /// The device the signal concerns, if any
    pub address: Option<Address>,
}

impl ConfirmationToken {
    /// Constructor
    pub const fn new(signal: Signal, address: Option<Address>) -> Self {
        Self { signal, address }
    }

    /// Whether an observed `other` satisfies this expected token
    pub fn is_satisfied_by(&self, other: &ConfirmationToken) -> bool {
        self.signal == other.signal && (self.address.is_none() || self.address == other.address)
    }
}

/// Identifies one transition, so late signals can be told apart
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransitionId(pub u64);

/// An observed signal, optionally tagged with the transition it answers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// The transition this signal was produced for. Untagged signals are
    /// attributed to whichever transition is pending.
    pub transition: Option<TransitionId>,
    /// What was observed
    pub token: ConfirmationToken,
}

impl Confirmation {
    /// An untagged confirmation
    pub const fn untagged(signal: Signal, address: Option<Address>) -> Self {
        Self { transition: None, token: ConfirmationToken::new(signal, address) }
    }
}

/// Side effects a transition asks its owner to carry out
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Bring up Bluetooth audio, to the given device or the best candidate
    ConnectBluetooth(Option<Address>),
    /// Tear down Bluetooth audio
    DisconnectBluetooth,
    /// Route call audio to a built-in or wired device of this type
    SetCommunicationDevice(AudioDeviceType),
    /// Let the platform pick the communication device again
    ClearCommunicationDevice,
}

//! The platform services this crate drives, expressed as traits so that the
//! registry and state machine receive them at construction.
//!
//! Implementations are invoked from the route thread and must not call back
//! into the registry synchronously.

use num_derive::FromPrimitive;

use crate::core::{
    address::Address,
    device::{GroupId, HiSyncId, Profile},
};

pub mod mocks;

/// Which audio use cases an active device is selected for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActiveDeviceUse {
    /// Voice calls only (HFP)
    PhoneCall,
    /// Both media and calls
    All,
}

/// The adapter-level operations
pub trait BluetoothAdapter: Send + Sync {
    /// Ask the stack to make `address` the active device for `usage`.
    /// Returns false if the stack rejected the request outright.
    fn set_active_device(&self, address: Address, usage: ActiveDeviceUse) -> bool;

    /// The devices the stack currently reports as active for `profile`
    fn active_devices(&self, profile: Profile) -> Vec<Address>;
}

/// SCO audio state of an HFP device, discriminants as broadcast by the
/// platform
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum ScoAudioState {
    /// No SCO link
    Disconnected = 10,
    /// SCO link being set up
    Connecting = 11,
    /// SCO link up
    Connected = 12,
}

/// Result of a SCO connect / disconnect request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScoRequestStatus {
    /// The request was accepted; completion is reported asynchronously
    Success,
    /// SCO was already up
    AlreadyConnected,
    /// SCO was already down
    AlreadyDisconnected,
    /// The stack refused, with the given status code
    Error(i32),
}

/// HFP profile proxy
pub trait HeadsetService: Send + Sync {
    /// Bring up SCO to the active HFP device
    fn connect_audio(&self) -> ScoRequestStatus;

    /// Tear down SCO
    fn disconnect_audio(&self) -> ScoRequestStatus;

    /// Current SCO state towards `address`
    fn audio_state(&self, address: Address) -> ScoAudioState;

    /// Whether the AG plays the ringtone in-band to the active device
    fn is_inband_ringing_enabled(&self) -> bool;
}

/// ASHA profile proxy
pub trait HearingAidService: Send + Sync {
    /// The id linking both sides of a binaural set, if known
    fn hi_sync_id(&self, address: Address) -> Option<HiSyncId>;
}

/// LE Audio profile proxy
pub trait LeAudioService: Send + Sync {
    /// The coordinated set the device belongs to, if any
    fn group_id(&self, address: Address) -> Option<GroupId>;

    /// Whether in-band ringtone is enabled for the group
    fn is_inband_ringtone_enabled(&self, group: GroupId) -> bool;
}

/// Device types of the platform audio service, restricted to those able
/// to act as a communication device
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AudioDeviceType {
    /// Built-in earpiece
    Earpiece,
    /// Built-in loudspeaker
    Speaker,
    /// Wired headset or headphones
    WiredHeadset,
    /// Dock audio
    Dock,
    /// HFP over SCO
    BluetoothSco,
    /// ASHA hearing aid
    HearingAid,
    /// LE Audio headset
    BleHeadset,
}

impl AudioDeviceType {
    /// The profile backing this device type, if it is a Bluetooth one
    pub fn profile(&self) -> Option<Profile> {
        match self {
            AudioDeviceType::BluetoothSco => Some(Profile::ClassicHeadset),
            AudioDeviceType::HearingAid => Some(Profile::HearingAid),
            AudioDeviceType::BleHeadset => Some(Profile::LeAudio),
            _ => None,
        }
    }

    /// The device type the audio service exposes for `profile`
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::ClassicHeadset => AudioDeviceType::BluetoothSco,
            Profile::HearingAid => AudioDeviceType::HearingAid,
            Profile::LeAudio => AudioDeviceType::BleHeadset,
        }
    }
}

/// A device descriptor of the platform audio service
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AudioDeviceInfo {
    /// Opaque id assigned by the audio service
    pub id: u32,
    /// Device type
    pub device_type: AudioDeviceType,
    /// Bluetooth address for Bluetooth device types
    pub address: Option<Address>,
}

/// The system audio-routing service
pub trait AudioManager: Send + Sync {
    /// Devices currently eligible as communication device
    fn available_communication_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Route call audio to `device`. Returns false if refused.
    fn set_communication_device(&self, device: &AudioDeviceInfo) -> bool;

    /// Revert to the platform default communication device
    fn clear_communication_device(&self);

    /// The device call audio is currently routed to
    fn communication_device(&self) -> Option<AudioDeviceInfo>;
}

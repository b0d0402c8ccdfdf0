//! Device records and the audio profiles they can be connected over

use std::fmt::{Display, Formatter, Result};

use num_derive::{FromPrimitive, ToPrimitive};

use super::address::Address;

/// The Bluetooth profiles able to carry call audio. Discriminants match the
/// profile ids used by the platform in its broadcasts.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Profile {
    /// HFP, audio over SCO
    ClassicHeadset = 1,
    /// ASHA hearing aids
    HearingAid = 21,
    /// LE Audio (CAP / TMAP)
    LeAudio = 22,
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let name = match self {
            Profile::ClassicHeadset => "HFP",
            Profile::HearingAid => "HA",
            Profile::LeAudio => "LE",
        };
        f.write_str(name)
    }
}

/// Coarse class of device, only used to deprioritize devices that should not
/// pick up call audio unless nothing else is around.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Default)]
pub enum DeviceClass {
    /// Headsets, car kits, hearing aids, earbuds
    #[default]
    AudioSink,
    /// Watches and other wrist-worn devices
    Wearable,
}

/// A remote accessory known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    /// The address the device was reported under
    pub address: Address,
    /// The class the device advertised
    pub class: DeviceClass,
}

impl Device {
    /// Constructor for an audio sink
    pub const fn new(address: Address) -> Self {
        Self { address, class: DeviceClass::AudioSink }
    }

    /// Constructor for a wrist-worn device
    pub const fn wearable(address: Address) -> Self {
        Self { address, class: DeviceClass::Wearable }
    }

    /// Whether this device is a watch or similar
    pub fn is_wearable(&self) -> bool {
        self.class == DeviceClass::Wearable
    }
}

/// Identifier of an LE Audio coordinated set
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupId(pub i32);

/// Identifier shared by the two halves of a binaural hearing aid pair
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct HiSyncId(pub u64);

//! Mocked platform services. Each mock records the calls made to it and
//! answers from state the test configures through its setters.

use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use crate::{
    core::{
        address::Address,
        device::{GroupId, HiSyncId, Profile},
    },
    platform::{
        ActiveDeviceUse, AudioDeviceInfo, AudioManager, BluetoothAdapter, HeadsetService,
        HearingAidService, LeAudioService, ScoAudioState, ScoRequestStatus,
    },
};

/// Mock BluetoothAdapter. Accepts every request unless told otherwise; the
/// reported active devices only change through `set_active`.
#[derive(Default)]
pub struct MockBluetoothAdapter {
    active: Mutex<HashMap<Profile, Vec<Address>>>,
    rejected: Mutex<HashSet<Address>>,
    set_active_calls: Mutex<Vec<(Address, ActiveDeviceUse)>>,
}

impl MockBluetoothAdapter {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `active_devices(profile)` report `addresses`
    pub fn set_active(&self, profile: Profile, addresses: Vec<Address>) {
        self.active.lock().unwrap().insert(profile, addresses);
    }

    /// Reject any further `set_active_device` for `address`
    pub fn reject(&self, address: Address) {
        self.rejected.lock().unwrap().insert(address);
    }

    /// Accept `set_active_device` for `address` again
    pub fn accept(&self, address: Address) {
        self.rejected.lock().unwrap().remove(&address);
    }

    /// All `set_active_device` calls so far
    pub fn set_active_calls(&self) -> Vec<(Address, ActiveDeviceUse)> {
        self.set_active_calls.lock().unwrap().clone()
    }
}

impl BluetoothAdapter for MockBluetoothAdapter {
    fn set_active_device(&self, address: Address, usage: ActiveDeviceUse) -> bool {
        self.set_active_calls.lock().unwrap().push((address, usage));
        !self.rejected.lock().unwrap().contains(&address)
    }

    fn active_devices(&self, profile: Profile) -> Vec<Address> {
        self.active.lock().unwrap().get(&profile).cloned().unwrap_or_default()
    }
}

/// Mock HeadsetService
pub struct MockHeadset {
    connect_result: Mutex<ScoRequestStatus>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    audio_states: Mutex<HashMap<Address, ScoAudioState>>,
    inband_ringing: AtomicBool,
}

impl MockHeadset {
    /// Constructor. SCO requests succeed by default.
    pub fn new() -> Self {
        Self {
            connect_result: Mutex::new(ScoRequestStatus::Success),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            audio_states: Mutex::default(),
            inband_ringing: AtomicBool::new(false),
        }
    }

    /// Result returned by further `connect_audio` calls
    pub fn set_connect_result(&self, result: ScoRequestStatus) {
        *self.connect_result.lock().unwrap() = result;
    }

    /// SCO state reported for `address`
    pub fn set_audio_state(&self, address: Address, state: ScoAudioState) {
        self.audio_states.lock().unwrap().insert(address, state);
    }

    /// In-band ringing flag
    pub fn set_inband_ringing(&self, enabled: bool) {
        self.inband_ringing.store(enabled, Ordering::SeqCst);
    }

    /// Number of `connect_audio` calls so far
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect_audio` calls so far
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockHeadset {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadsetService for MockHeadset {
    fn connect_audio(&self) -> ScoRequestStatus {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.connect_result.lock().unwrap()
    }

    fn disconnect_audio(&self) -> ScoRequestStatus {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        ScoRequestStatus::Success
    }

    fn audio_state(&self, address: Address) -> ScoAudioState {
        self.audio_states
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(ScoAudioState::Disconnected)
    }

    fn is_inband_ringing_enabled(&self) -> bool {
        self.inband_ringing.load(Ordering::SeqCst)
    }
}

/// Mock HearingAidService
#[derive(Default)]
pub struct MockHearingAid {
    sync_ids: Mutex<HashMap<Address, HiSyncId>>,
}

impl MockHearingAid {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `id` as the sync id of `address`
    pub fn set_hi_sync_id(&self, address: Address, id: HiSyncId) {
        self.sync_ids.lock().unwrap().insert(address, id);
    }
}

impl HearingAidService for MockHearingAid {
    fn hi_sync_id(&self, address: Address) -> Option<HiSyncId> {
        self.sync_ids.lock().unwrap().get(&address).copied()
    }
}

/// Mock LeAudioService
#[derive(Default)]
pub struct MockLeAudio {
    group_ids: Mutex<HashMap<Address, GroupId>>,
    inband_groups: Mutex<HashSet<GroupId>>,
}

impl MockLeAudio {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `group` as the coordinated set of `address`
    pub fn set_group_id(&self, address: Address, group: GroupId) {
        self.group_ids.lock().unwrap().insert(address, group);
    }

    /// In-band ringtone flag of `group`
    pub fn set_inband_ringtone(&self, group: GroupId, enabled: bool) {
        let mut groups = self.inband_groups.lock().unwrap();
        if enabled {
            groups.insert(group);
        } else {
            groups.remove(&group);
        }
    }
}

impl LeAudioService for MockLeAudio {
    fn group_id(&self, address: Address) -> Option<GroupId> {
        self.group_ids.lock().unwrap().get(&address).copied()
    }

    fn is_inband_ringtone_enabled(&self, group: GroupId) -> bool {
        self.inband_groups.lock().unwrap().contains(&group)
    }
}

/// Mock AudioManager. A successful `set_communication_device` takes effect
/// immediately.
#[derive(Default)]
pub struct MockAudioManager {
    available: Mutex<Vec<AudioDeviceInfo>>,
    current: Mutex<Option<AudioDeviceInfo>>,
    set_calls: Mutex<Vec<AudioDeviceInfo>>,
    clear_calls: AtomicUsize,
    refuse: AtomicBool,
}

impl MockAudioManager {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices reported by `available_communication_devices`
    pub fn set_available(&self, devices: Vec<AudioDeviceInfo>) {
        *self.available.lock().unwrap() = devices;
    }

    /// Refuse further `set_communication_device` calls
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// All `set_communication_device` calls so far
    pub fn set_calls(&self) -> Vec<AudioDeviceInfo> {
        self.set_calls.lock().unwrap().clone()
    }

    /// Number of `clear_communication_device` calls so far
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

impl AudioManager for MockAudioManager {
    fn available_communication_devices(&self) -> Vec<AudioDeviceInfo> {
        self.available.lock().unwrap().clone()
    }

    fn set_communication_device(&self, device: &AudioDeviceInfo) -> bool {
        self.set_calls.lock().unwrap().push(*device);
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        *self.current.lock().unwrap() = Some(*device);
        true
    }

    fn clear_communication_device(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
    }

    fn communication_device(&self) -> Option<AudioDeviceInfo> {
        *self.current.lock().unwrap()
    }
}

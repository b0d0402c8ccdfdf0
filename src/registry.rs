//! The device registry: which call-audio accessories are connected over
//! which profile, which of them the stack reports active, and the low-level
//! operations that move call audio onto one of them.
//!
//! Bookkeeping lives behind a narrow lock, since profile callbacks arrive on
//! platform threads. The lock is never held while calling into a platform
//! service: handles are cloned out first.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::time::timeout;

use crate::{
    core::{
        address::Address,
        device::{Device, GroupId, HiSyncId, Profile},
    },
    platform::{
        ActiveDeviceUse, AudioDeviceType, AudioManager, BluetoothAdapter, HeadsetService,
        HearingAidService, LeAudioService, ScoAudioState, ScoRequestStatus,
    },
    route::Message,
};

/// Profiles in the order a device reported under several of them is
/// operated on
const CONNECT_PRIORITY: [Profile; 3] =
    [Profile::LeAudio, Profile::HearingAid, Profile::ClassicHeadset];

/// Profiles in the order their active device is trusted as the connect
/// target
const ACTIVE_PRIORITY: [Profile; 3] =
    [Profile::ClassicHeadset, Profile::HearingAid, Profile::LeAudio];

/// Errors that can occur when connecting call audio to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAudioFailure {
    /// The address is not connected over any call-audio profile
    NoSuchDevice,
    /// The owning profile service is not bound
    ServiceUnavailable(Profile),
    /// The stack refused to make the device active
    ActiveDeviceRejected,
    /// The headset service refused to bring up SCO
    ScoRejected(ScoRequestStatus),
}

/// Errors that can occur when a profile reports a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRejected {
    /// The device cannot be used until the profile service is bound
    ServiceUnavailable(Profile),
    /// The platform reported an all-zero address
    EmptyAddress,
}

/// A bound profile service
#[derive(Clone)]
pub enum ProfileService {
    /// HFP
    Headset(Arc<dyn HeadsetService>),
    /// ASHA
    HearingAid(Arc<dyn HearingAidService>),
    /// LE Audio
    LeAudio(Arc<dyn LeAudioService>),
}

impl ProfileService {
    /// The profile this service implements
    pub fn profile(&self) -> Profile {
        match self {
            ProfileService::Headset(_) => Profile::ClassicHeadset,
            ProfileService::HearingAid(_) => Profile::HearingAid,
            ProfileService::LeAudio(_) => Profile::LeAudio,
        }
    }
}

/// A set of devices acting as one logical accessory
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
enum SetKey {
    HearingAid(HiSyncId),
    LeAudio(GroupId),
}

#[derive(Default)]
struct DeviceLists {
    devices: HashMap<Profile, Vec<Device>>,
    hi_sync_ids: HashMap<Address, HiSyncId>,
    group_ids: HashMap<Address, GroupId>,
    active: HashMap<Profile, Address>,
    hearing_aid: Option<Arc<dyn HearingAidService>>,
    le_audio: Option<Arc<dyn LeAudioService>>,
    /// Device we made the communication device, and the type we used
    communication_device: Option<(Address, AudioDeviceType)>,
}

impl DeviceLists {
    fn of(&self, profile: Profile) -> &[Device] {
        self.devices.get(&profile).map(Vec::as_slice).unwrap_or_default()
    }

    fn find(&self, address: Address) -> Option<(Profile, &Device)> {
        CONNECT_PRIORITY.into_iter().find_map(|profile| {
            self.of(profile).iter().find(|d| d.address == address).map(|d| (profile, d))
        })
    }

    fn is_connected(&self, address: Address) -> bool {
        self.find(address).is_some()
    }

    /// Connected devices of all profiles. A device present under several
    /// profiles is listed once, and LE Audio set members are dropped when a
    /// headset of the same set is already listed.
    fn connected(&self) -> Vec<Device> {
        let mut out: Vec<Device> = vec![];
        let mut headset_groups: HashSet<GroupId> = HashSet::new();

        for profile in [Profile::ClassicHeadset, Profile::HearingAid, Profile::LeAudio] {
            for device in self.of(profile) {
                if out.iter().any(|d| d.address == device.address) {
                    continue;
                }
                let group = self.group_ids.get(&device.address);
                match profile {
                    Profile::ClassicHeadset => headset_groups.extend(group),
                    Profile::LeAudio if group.is_some_and(|g| headset_groups.contains(g)) => {
                        continue
                    }
                    _ => {}
                }
                out.push(device.clone());
            }
        }
        out
    }
}

/// Tracks connected accessories and performs audio operations on them
pub struct DeviceRegistry {
    lists: Mutex<DeviceLists>,
    headset: watch::Sender<Option<Arc<dyn HeadsetService>>>,
    adapter: Arc<dyn BluetoothAdapter>,
    audio_manager: Arc<dyn AudioManager>,
    tx: UnboundedSender<Message>,
    headset_bind_timeout: Duration,
}

impl DeviceRegistry {
    /// Constructor. Profile services are attached later through
    /// `on_service_connected`.
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        audio_manager: Arc<dyn AudioManager>,
        tx: UnboundedSender<Message>,
        headset_bind_timeout: Duration,
    ) -> Self {
        Self {
            lists: Mutex::default(),
            headset: watch::channel(None).0,
            adapter,
            audio_manager,
            tx,
            headset_bind_timeout,
        }
    }

    fn lists(&self) -> MutexGuard<'_, DeviceLists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a profile service
    pub fn on_service_connected(&self, service: ProfileService) {
        info!("{} service connected", service.profile());
        match service {
            ProfileService::Headset(headset) => {
                self.headset.send_replace(Some(headset));
            }
            ProfileService::HearingAid(hearing_aid) => {
                self.lists().hearing_aid = Some(hearing_aid);
            }
            ProfileService::LeAudio(le_audio) => {
                self.lists().le_audio = Some(le_audio);
            }
        }
    }

    /// Detach a profile service. Returns the devices of that profile, which
    /// the caller must report lost.
    pub fn on_service_disconnected(&self, profile: Profile) -> Vec<Address> {
        info!("{} service disconnected", profile);
        if profile == Profile::ClassicHeadset {
            self.headset.send_replace(None);
        }
        let mut lists = self.lists();
        match profile {
            Profile::HearingAid => lists.hearing_aid = None,
            Profile::LeAudio => lists.le_audio = None,
            Profile::ClassicHeadset => {}
        }
        lists.of(profile).iter().map(|d| d.address).collect()
    }

    /// The headset service, waiting a bounded time for it to attach
    async fn headset(&self) -> Option<Arc<dyn HeadsetService>> {
        let mut rx = self.headset.subscribe();
        let bound = timeout(self.headset_bind_timeout, rx.wait_for(Option::is_some)).await;
        match bound {
            Ok(Ok(headset)) => (*headset).clone(),
            _ => {
                warn!("headset service not bound after {:?}", self.headset_bind_timeout);
                None
            }
        }
    }

    /// Record a profile connection. Returns `Ok(false)` if the device was
    /// already known under `profile`.
    pub fn on_device_connected(
        &self,
        device: Device,
        profile: Profile,
    ) -> Result<bool, DeviceRejected> {
        let address = device.address;
        if address == Address::EMPTY {
            return Err(DeviceRejected::EmptyAddress);
        }

        let (hearing_aid, le_audio, known_group) = {
            let lists = self.lists();
            (lists.hearing_aid.clone(), lists.le_audio.clone(), lists.group_ids.get(&address).copied())
        };

        let mut group_id = known_group;
        let mut hi_sync_id = None;
        match profile {
            Profile::LeAudio => {
                let Some(le_audio) = le_audio else {
                    warn!("LE audio service unavailable, rejecting {:?}", address);
                    return Err(DeviceRejected::ServiceUnavailable(profile));
                };
                if group_id.is_none() {
                    group_id = le_audio.group_id(address);
                }
            }
            Profile::ClassicHeadset => {
                // dual-mode headsets share an LE Audio set with their LE side
                if let (None, Some(le_audio)) = (group_id, le_audio) {
                    group_id = le_audio.group_id(address);
                }
            }
            Profile::HearingAid => {
                hi_sync_id = hearing_aid.and_then(|ha| ha.hi_sync_id(address));
            }
        }

        let mut lists = self.lists();
        let devices = lists.devices.entry(profile).or_default();
        if devices.iter().any(|d| d.address == address) {
            warn!("{:?} already connected over {}", address, profile);
            return Ok(false);
        }
        devices.push(device);
        if let Some(group_id) = group_id {
            lists.group_ids.insert(address, group_id);
        }
        if let Some(hi_sync_id) = hi_sync_id {
            lists.hi_sync_ids.insert(address, hi_sync_id);
        }
        info!("{:?} connected over {} (group {:?})", address, profile, group_id);
        Ok(true)
    }

    /// Record a profile disconnection. Returns false if the device was not
    /// known under `profile`.
    pub fn on_device_disconnected(&self, address: Address, profile: Profile) -> bool {
        let mut lists = self.lists();
        let Some(devices) = lists.devices.get_mut(&profile) else {
            return false;
        };
        let before = devices.len();
        devices.retain(|d| d.address != address);
        if devices.len() == before {
            debug!("{:?} was not connected over {}", address, profile);
            return false;
        }

        if lists.active.get(&profile) == Some(&address) {
            lists.active.remove(&profile);
        }
        if !lists.is_connected(address) {
            lists.group_ids.remove(&address);
            lists.hi_sync_ids.remove(&address);
            if lists.communication_device.is_some_and(|(a, _)| a == address) {
                lists.communication_device = None;
            }
        }
        info!("{:?} disconnected from {}", address, profile);
        true
    }

    /// Record the active device reported by the stack for `profile`.
    /// Returns whether any profile had an active device before, and after.
    pub fn on_active_device_changed(
        &self,
        profile: Profile,
        address: Option<Address>,
    ) -> (bool, bool) {
        let mut lists = self.lists();
        let had_any = !lists.active.is_empty();
        match address {
            Some(address) => lists.active.insert(profile, address),
            None => lists.active.remove(&profile),
        };
        (had_any, !lists.active.is_empty())
    }

    /// The cached active device of `profile`
    pub fn active_device(&self, profile: Profile) -> Option<Address> {
        self.lists().active.get(&profile).copied()
    }

    /// Whether `address` is connected over any call-audio profile
    pub fn is_connected(&self, address: Address) -> bool {
        self.lists().is_connected(address)
    }

    /// The profile `address` would be operated on through
    pub fn profile_of(&self, address: Address) -> Option<Profile> {
        self.lists().find(address).map(|(profile, _)| profile)
    }

    /// All connected devices; see `DeviceLists::connected` for the
    /// de-duplication applied
    pub fn connected_devices(&self) -> Vec<Device> {
        self.lists().connected()
    }

    /// Like `connected_devices`, with hearing aid pairs and LE Audio sets
    /// collapsed to one device each, preferring the active member
    pub fn unique_connected_devices(&self) -> Vec<Device> {
        let active_hearing_aids = self.adapter.active_devices(Profile::HearingAid);
        let active_le = self.adapter.active_devices(Profile::LeAudio);

        let lists = self.lists();
        let mut out: Vec<Device> = vec![];
        let mut sets: HashMap<SetKey, usize> = HashMap::new();

        for device in lists.connected() {
            let key = match lists.find(device.address).map(|(p, _)| p) {
                Some(Profile::HearingAid) => {
                    lists.hi_sync_ids.get(&device.address).map(|id| SetKey::HearingAid(*id))
                }
                Some(Profile::LeAudio) => {
                    lists.group_ids.get(&device.address).map(|id| SetKey::LeAudio(*id))
                }
                _ => None,
            };
            let active = match key {
                Some(SetKey::HearingAid(_)) => &active_hearing_aids,
                _ => &active_le,
            };

            match key.map(|key| sets.entry(key)) {
                Some(Entry::Occupied(index)) => {
                    if active.contains(&device.address) {
                        out[*index.get()] = device;
                    }
                }
                Some(Entry::Vacant(entry)) => {
                    entry.insert(out.len());
                    out.push(device);
                }
                None => out.push(device),
            }
        }
        out
    }

    /// Pick the device a connect request should go to: `requested` if it is
    /// connected, else the device the stack reports active, else the most
    /// recently used connected device, else any connected device, with
    /// wearables picked last.
    pub fn resolve_connect_target(
        &self,
        requested: Option<Address>,
        most_recently_used: &[Address],
    ) -> Option<Address> {
        let lists = self.lists();

        if let Some(requested) = requested {
            if lists.is_connected(requested) {
                return Some(requested);
            }
            warn!("requested {:?} is not connected, picking another device", requested);
        }

        let active = ACTIVE_PRIORITY
            .into_iter()
            .filter_map(|profile| lists.active.get(&profile).copied())
            .find(|address| lists.is_connected(*address));
        if active.is_some() {
            return active;
        }

        let recent =
            most_recently_used.iter().rev().copied().find(|address| lists.is_connected(*address));
        if recent.is_some() {
            return recent;
        }

        let connected = lists.connected();
        connected
            .iter()
            .find(|d| !d.is_wearable())
            .or_else(|| connected.first())
            .map(|d| d.address)
    }

    /// Move call audio onto `address`. Unless `switching_devices`, also make
    /// it the communication device. Completion is reported asynchronously.
    pub async fn connect_audio(
        &self,
        address: Address,
        switching_devices: bool,
    ) -> Result<(), ConnectAudioFailure> {
        let Some(profile) = self.profile_of(address) else {
            warn!("cannot connect audio to unknown device {:?}", address);
            return Err(ConnectAudioFailure::NoSuchDevice);
        };
        info!("connecting audio to {:?} over {} (switching={})", address, profile, switching_devices);

        match profile {
            Profile::LeAudio | Profile::HearingAid => {
                if !self.adapter.set_active_device(address, ActiveDeviceUse::All) {
                    warn!("stack rejected {:?} as active {} device", address, profile);
                    return Err(ConnectAudioFailure::ActiveDeviceRejected);
                }
            }
            Profile::ClassicHeadset => {
                let Some(headset) = self.headset().await else {
                    return Err(ConnectAudioFailure::ServiceUnavailable(profile));
                };
                if !self.adapter.set_active_device(address, ActiveDeviceUse::PhoneCall) {
                    warn!("stack rejected {:?} as active HFP device", address);
                    return Err(ConnectAudioFailure::ActiveDeviceRejected);
                }
                match headset.connect_audio() {
                    ScoRequestStatus::Success | ScoRequestStatus::AlreadyConnected => {}
                    status => {
                        warn!("SCO connect to {:?} failed: {:?}", address, status);
                        return Err(ConnectAudioFailure::ScoRejected(status));
                    }
                }
            }
        }

        // checked again once audio is up
        if !switching_devices && !self.set_communication_device_for(address) {
            debug!("{:?} not the communication device yet", address);
        }
        Ok(())
    }

    /// Make `address` the communication device of the audio service, if it
    /// is not already. Returns false if the audio service does not offer it
    /// or refuses.
    pub fn set_communication_device_for(&self, address: Address) -> bool {
        let Some(profile) = self.profile_of(address) else {
            return false;
        };
        let device_type = AudioDeviceType::for_profile(profile);
        if self.lists().communication_device == Some((address, device_type)) {
            debug!("{:?} is already the communication device", address);
            return true;
        }

        let candidate = self
            .audio_manager
            .available_communication_devices()
            .into_iter()
            .find(|info| info.device_type == device_type && info.address == Some(address));
        let Some(candidate) = candidate else {
            warn!("{:?} not offered as {:?} communication device", address, device_type);
            return false;
        };
        if !self.audio_manager.set_communication_device(&candidate) {
            warn!("audio service refused {:?} as communication device", address);
            return false;
        }
        self.lists().communication_device = Some((address, device_type));
        true
    }

    /// The device we last made the communication device, if still set
    pub fn communication_device(&self) -> Option<(Address, AudioDeviceType)> {
        self.lists().communication_device
    }

    /// Tear down Bluetooth call audio, whichever profile carries it
    pub async fn disconnect_audio(&self) {
        if let Some(headset) = self.headset().await {
            let status = headset.disconnect_audio();
            debug!("SCO disconnect: {:?}", status);
        }

        let cleared = self.lists().communication_device.take();
        let Some((address, device_type)) = cleared else {
            return;
        };
        info!("clearing communication device {:?}", address);
        self.audio_manager.clear_communication_device();

        // LE Audio and hearing aids have no SCO event to report the loss
        if device_type != AudioDeviceType::BluetoothSco {
            let _ = self.tx.send(Message::AudioLost(Some(address)));
        }
    }

    /// The device call audio is actually flowing to, as the platform sees it
    pub async fn audio_connected_device(&self) -> Option<Address> {
        if let Some(address) = self.active_device(Profile::ClassicHeadset) {
            if let Some(headset) = self.headset().await {
                if headset.audio_state(address) == ScoAudioState::Connected {
                    return Some(address);
                }
            }
        }

        let current = self.audio_manager.communication_device()?;
        let address = current.address?;
        let profile = current.device_type.profile()?;
        if profile == Profile::ClassicHeadset {
            return None;
        }
        let lists = self.lists();
        let is_active = lists.active.get(&profile) == Some(&address);
        (is_active && lists.of(profile).iter().any(|d| d.address == address)).then_some(address)
    }

    /// Whether the ringtone is played in-band to `address`. False whenever
    /// this cannot be determined.
    pub async fn is_inband_ringing_enabled(&self, address: Address) -> bool {
        let (profile, le_audio, group_id) = {
            let lists = self.lists();
            (
                lists.find(address).map(|(p, _)| p),
                lists.le_audio.clone(),
                lists.group_ids.get(&address).copied(),
            )
        };
        match profile {
            Some(Profile::LeAudio) => match (le_audio, group_id) {
                (Some(le_audio), Some(group_id)) => le_audio.is_inband_ringtone_enabled(group_id),
                _ => false,
            },
            Some(Profile::ClassicHeadset) => match self.headset().await {
                Some(headset) => headset.is_inband_ringing_enabled(),
                None => false,
            },
            _ => false,
        }
    }

    /// Human readable bookkeeping, for dumps
    pub fn dump(&self) -> Vec<String> {
        let lists = self.lists();
        let mut out = vec![];
        for profile in [Profile::ClassicHeadset, Profile::HearingAid, Profile::LeAudio] {
            let devices = lists.of(profile).iter().map(|d| format!("{:?}", d.address));
            out.push(format!(
                "{}: [{}] active {:?}",
                profile,
                devices.collect::<Vec<_>>().join(", "),
                lists.active.get(&profile)
            ));
        }
        out.push(format!("communication device: {:?}", lists.communication_device));
        out
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use super::*;
    use crate::{
        platform::{
            mocks::mock_platform::{
                MockAudioManager, MockBluetoothAdapter, MockHeadset, MockHearingAid, MockLeAudio,
            },
            AudioDeviceInfo,
        },
        utils::task::block_on_locally,
    };

    const ADDRESS_1: Address = Address([1, 1, 1, 1, 1, 1]);
    const ADDRESS_2: Address = Address([2, 2, 2, 2, 2, 2]);
    const ADDRESS_3: Address = Address([3, 3, 3, 3, 3, 3]);

    struct Fixture {
        registry: DeviceRegistry,
        adapter: Arc<MockBluetoothAdapter>,
        headset: Arc<MockHeadset>,
        hearing_aid: Arc<MockHearingAid>,
        le_audio: Arc<MockLeAudio>,
        audio_manager: Arc<MockAudioManager>,
        rx: UnboundedReceiver<Message>,
    }

    fn create_registry() -> Fixture {
        let adapter = Arc::new(MockBluetoothAdapter::new());
        let audio_manager = Arc::new(MockAudioManager::new());
        let (tx, rx) = unbounded_channel();
        let registry = DeviceRegistry::new(
            adapter.clone(),
            audio_manager.clone(),
            tx,
            Duration::from_millis(500),
        );
        let headset = Arc::new(MockHeadset::new());
        let hearing_aid = Arc::new(MockHearingAid::new());
        let le_audio = Arc::new(MockLeAudio::new());
        registry.on_service_connected(ProfileService::Headset(headset.clone()));
        registry.on_service_connected(ProfileService::HearingAid(hearing_aid.clone()));
        registry.on_service_connected(ProfileService::LeAudio(le_audio.clone()));
        Fixture { registry, adapter, headset, hearing_aid, le_audio, audio_manager, rx }
    }

    fn offer(audio_manager: &MockAudioManager, devices: &[(Address, AudioDeviceType)]) {
        audio_manager.set_available(
            devices
                .iter()
                .enumerate()
                .map(|(id, (address, device_type))| AudioDeviceInfo {
                    id: id as u32,
                    device_type: *device_type,
                    address: Some(*address),
                })
                .collect(),
        );
    }

    fn addresses(devices: Vec<Device>) -> Vec<Address> {
        devices.into_iter().map(|d| d.address).collect()
    }

    #[test]
    fn test_connect_is_idempotent() {
        // arrange
        let f = create_registry();

        // act
        let first = f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset);
        let second =
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset);

        // assert
        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(false));
        assert_eq!(addresses(f.registry.connected_devices()), vec![ADDRESS_1]);
    }

    #[test]
    fn test_lost_device_is_not_reported() {
        let f = create_registry();
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::HearingAid).unwrap();

        assert!(f.registry.on_device_disconnected(ADDRESS_1, Profile::ClassicHeadset));
        assert!(!f.registry.on_device_disconnected(ADDRESS_1, Profile::ClassicHeadset));

        assert_eq!(addresses(f.registry.connected_devices()), vec![ADDRESS_2]);
        assert!(!f.registry.is_connected(ADDRESS_1));
    }

    #[test]
    fn test_le_audio_rejected_without_service() {
        // arrange
        let f = create_registry();
        f.registry.on_service_disconnected(Profile::LeAudio);

        // act
        let result = f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::LeAudio);

        // assert: rejected, not queued
        assert_eq!(result, Err(DeviceRejected::ServiceUnavailable(Profile::LeAudio)));
        assert!(f.registry.connected_devices().is_empty());
    }

    #[test]
    fn test_empty_address_rejected() {
        let f = create_registry();

        let result = f.registry.on_device_connected(Device::new(Address::EMPTY), Profile::HearingAid);

        assert_eq!(result, Err(DeviceRejected::EmptyAddress));
    }

    #[test]
    fn test_le_audio_set_member_of_headset_is_collapsed() {
        // arrange: a dual-mode headset, its classic and LE sides in one set
        let f = create_registry();
        f.le_audio.set_group_id(ADDRESS_1, GroupId(4));
        f.le_audio.set_group_id(ADDRESS_2, GroupId(4));
        f.le_audio.set_group_id(ADDRESS_3, GroupId(9));

        // act
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::LeAudio).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_3), Profile::LeAudio).unwrap();

        // assert
        assert_eq!(addresses(f.registry.connected_devices()), vec![ADDRESS_1, ADDRESS_3]);
    }

    #[test]
    fn test_unique_collapses_hearing_aid_pair_to_active_member() {
        // arrange: a binaural pair, the right side reported active
        let f = create_registry();
        f.hearing_aid.set_hi_sync_id(ADDRESS_1, HiSyncId(77));
        f.hearing_aid.set_hi_sync_id(ADDRESS_2, HiSyncId(77));
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::HearingAid).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::HearingAid).unwrap();
        f.adapter.set_active(Profile::HearingAid, vec![ADDRESS_2]);

        // act
        let unique = f.registry.unique_connected_devices();

        // assert
        assert_eq!(addresses(unique), vec![ADDRESS_2]);
        assert_eq!(f.registry.connected_devices().len(), 2);
    }

    #[test]
    fn test_unique_collapses_le_audio_set() {
        let f = create_registry();
        f.le_audio.set_group_id(ADDRESS_1, GroupId(1));
        f.le_audio.set_group_id(ADDRESS_2, GroupId(1));
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::LeAudio).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::LeAudio).unwrap();

        assert_eq!(addresses(f.registry.unique_connected_devices()), vec![ADDRESS_1]);
    }

    #[test]
    fn test_resolve_prefers_requested_then_active_then_recent() {
        // arrange
        let f = create_registry();
        for address in [ADDRESS_1, ADDRESS_2, ADDRESS_3] {
            f.registry.on_device_connected(Device::new(address), Profile::ClassicHeadset).unwrap();
        }

        // assert: explicit request wins
        assert_eq!(f.registry.resolve_connect_target(Some(ADDRESS_3), &[]), Some(ADDRESS_3));

        // assert: most recently used, then first connected
        assert_eq!(
            f.registry.resolve_connect_target(None, &[ADDRESS_3, ADDRESS_2]),
            Some(ADDRESS_2)
        );
        assert_eq!(f.registry.resolve_connect_target(None, &[]), Some(ADDRESS_1));

        // assert: the active device beats recent use
        f.registry.on_active_device_changed(Profile::ClassicHeadset, Some(ADDRESS_3));
        assert_eq!(f.registry.resolve_connect_target(None, &[ADDRESS_2]), Some(ADDRESS_3));
    }

    #[test]
    fn test_resolve_skips_wearables_unless_alone() {
        let f = create_registry();
        f.registry.on_device_connected(Device::wearable(ADDRESS_1), Profile::ClassicHeadset).unwrap();

        assert_eq!(f.registry.resolve_connect_target(None, &[]), Some(ADDRESS_1));

        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::ClassicHeadset).unwrap();

        assert_eq!(f.registry.resolve_connect_target(None, &[]), Some(ADDRESS_2));
    }

    #[test]
    fn test_resolve_without_devices() {
        let f = create_registry();

        assert_eq!(f.registry.resolve_connect_target(Some(ADDRESS_1), &[ADDRESS_1]), None);
    }

    #[test]
    fn test_connect_headset_audio() {
        block_on_locally(async {
            // arrange
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
            offer(&f.audio_manager, &[(ADDRESS_1, AudioDeviceType::BluetoothSco)]);

            // act
            let result = f.registry.connect_audio(ADDRESS_1, false).await;

            // assert
            assert_eq!(result, Ok(()));
            assert_eq!(f.adapter.set_active_calls(), vec![(ADDRESS_1, ActiveDeviceUse::PhoneCall)]);
            assert_eq!(f.headset.connect_calls(), 1);
            assert_eq!(
                f.registry.communication_device(),
                Some((ADDRESS_1, AudioDeviceType::BluetoothSco))
            );
        });
    }

    #[test]
    fn test_connect_while_switching_leaves_communication_device() {
        block_on_locally(async {
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::LeAudio).unwrap();
            offer(&f.audio_manager, &[(ADDRESS_1, AudioDeviceType::BleHeadset)]);

            let result = f.registry.connect_audio(ADDRESS_1, true).await;

            assert_eq!(result, Ok(()));
            assert_eq!(f.adapter.set_active_calls(), vec![(ADDRESS_1, ActiveDeviceUse::All)]);
            assert!(f.audio_manager.set_calls().is_empty());
            assert_eq!(f.headset.connect_calls(), 0);
        });
    }

    #[test]
    fn test_connect_failures() {
        block_on_locally(async {
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();

            assert_eq!(
                f.registry.connect_audio(ADDRESS_2, false).await,
                Err(ConnectAudioFailure::NoSuchDevice)
            );

            f.headset.set_connect_result(ScoRequestStatus::Error(6));
            assert_eq!(
                f.registry.connect_audio(ADDRESS_1, false).await,
                Err(ConnectAudioFailure::ScoRejected(ScoRequestStatus::Error(6)))
            );

            f.adapter.reject(ADDRESS_1);
            assert_eq!(
                f.registry.connect_audio(ADDRESS_1, false).await,
                Err(ConnectAudioFailure::ActiveDeviceRejected)
            );
        });
    }

    #[test]
    fn test_headset_operations_give_up_when_service_unbound() {
        block_on_locally(async {
            // arrange
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
            f.registry.on_service_disconnected(Profile::ClassicHeadset);

            // act
            let result = f.registry.connect_audio(ADDRESS_1, false).await;

            // assert: failed fast after the bind wait, fail closed elsewhere
            assert_eq!(
                result,
                Err(ConnectAudioFailure::ServiceUnavailable(Profile::ClassicHeadset))
            );
            assert!(!f.registry.is_inband_ringing_enabled(ADDRESS_1).await);
        });
    }

    #[test]
    fn test_headset_bound_during_wait() {
        block_on_locally(async {
            // arrange
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
            f.registry.on_service_disconnected(Profile::ClassicHeadset);
            f.headset.set_inband_ringing(true);

            // act: the service comes back while the query waits
            let registry = Arc::new(f.registry);
            let query = tokio::task::spawn_local({
                let registry = registry.clone();
                async move { registry.is_inband_ringing_enabled(ADDRESS_1).await }
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            registry.on_service_connected(ProfileService::Headset(f.headset.clone()));

            // assert
            assert!(query.await.unwrap());
        });
    }

    #[test]
    fn test_inband_ringing_for_le_audio_group() {
        block_on_locally(async {
            let f = create_registry();
            f.le_audio.set_group_id(ADDRESS_1, GroupId(3));
            f.le_audio.set_inband_ringtone(GroupId(3), true);
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::LeAudio).unwrap();
            f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::HearingAid).unwrap();

            assert!(f.registry.is_inband_ringing_enabled(ADDRESS_1).await);
            assert!(!f.registry.is_inband_ringing_enabled(ADDRESS_2).await);
            assert!(!f.registry.is_inband_ringing_enabled(ADDRESS_3).await);
        });
    }

    #[test]
    fn test_disconnect_le_audio_reports_loss() {
        block_on_locally(async {
            // arrange
            let mut f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::LeAudio).unwrap();
            offer(&f.audio_manager, &[(ADDRESS_1, AudioDeviceType::BleHeadset)]);
            f.registry.connect_audio(ADDRESS_1, false).await.unwrap();

            // act
            f.registry.disconnect_audio().await;

            // assert
            assert_eq!(f.audio_manager.clear_calls(), 1);
            assert_eq!(f.headset.disconnect_calls(), 1);
            assert!(matches!(f.rx.try_recv(), Ok(Message::AudioLost(Some(ADDRESS_1)))));
            assert_eq!(f.registry.communication_device(), None);
        });
    }

    #[test]
    fn test_disconnect_sco_waits_for_hardware_event() {
        block_on_locally(async {
            let mut f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
            offer(&f.audio_manager, &[(ADDRESS_1, AudioDeviceType::BluetoothSco)]);
            f.registry.connect_audio(ADDRESS_1, false).await.unwrap();

            f.registry.disconnect_audio().await;

            assert_eq!(f.audio_manager.clear_calls(), 1);
            assert!(f.rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_set_communication_device_is_idempotent() {
        let f = create_registry();
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::HearingAid).unwrap();
        offer(&f.audio_manager, &[(ADDRESS_1, AudioDeviceType::HearingAid)]);

        assert!(f.registry.set_communication_device_for(ADDRESS_1));
        assert!(f.registry.set_communication_device_for(ADDRESS_1));

        assert_eq!(f.audio_manager.set_calls().len(), 1);
    }

    #[test]
    fn test_audio_connected_device() {
        block_on_locally(async {
            // arrange
            let f = create_registry();
            f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::ClassicHeadset).unwrap();
            f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::HearingAid).unwrap();
            offer(&f.audio_manager, &[(ADDRESS_2, AudioDeviceType::HearingAid)]);

            // assert: nothing flowing yet
            assert_eq!(f.registry.audio_connected_device().await, None);

            // act: SCO up to the active headset
            f.registry.on_active_device_changed(Profile::ClassicHeadset, Some(ADDRESS_1));
            f.headset.set_audio_state(ADDRESS_1, ScoAudioState::Connected);
            assert_eq!(f.registry.audio_connected_device().await, Some(ADDRESS_1));

            // act: SCO down, the active hearing aid is the communication device
            f.headset.set_audio_state(ADDRESS_1, ScoAudioState::Disconnected);
            f.registry.on_active_device_changed(Profile::HearingAid, Some(ADDRESS_2));
            f.registry.set_communication_device_for(ADDRESS_2);
            assert_eq!(f.registry.audio_connected_device().await, Some(ADDRESS_2));
        });
    }

    #[test]
    fn test_active_device_presence() {
        let f = create_registry();

        assert_eq!(
            f.registry.on_active_device_changed(Profile::LeAudio, Some(ADDRESS_1)),
            (false, true)
        );
        assert_eq!(
            f.registry.on_active_device_changed(Profile::ClassicHeadset, Some(ADDRESS_2)),
            (true, true)
        );
        f.registry.on_active_device_changed(Profile::LeAudio, None);
        assert_eq!(
            f.registry.on_active_device_changed(Profile::ClassicHeadset, None),
            (true, false)
        );
    }

    #[test]
    fn test_service_disconnect_lists_its_devices() {
        let f = create_registry();
        f.registry.on_device_connected(Device::new(ADDRESS_1), Profile::HearingAid).unwrap();
        f.registry.on_device_connected(Device::new(ADDRESS_2), Profile::ClassicHeadset).unwrap();

        assert_eq!(f.registry.on_service_disconnected(Profile::HearingAid), vec![ADDRESS_1]);
    }
}

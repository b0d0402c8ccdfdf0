use std::future::Future;
use std::sync::Arc;

use bluetooth_audio_route::{
    config::RouteConfig,
    core::{
        address::Address,
        device::{Device, Profile},
    },
    events::{ConnectionState, EventDispatcher, PlatformEvent},
    init_logging,
    platform::{
        mocks::{
            mock_callbacks::{
                MockRouteEvents, MockRouteListener, MockTransitionEvents, MockTransitionListener,
            },
            mock_platform::{
                MockAudioManager, MockBluetoothAdapter, MockHeadset, MockHearingAid, MockLeAudio,
            },
        },
        AudioDeviceInfo, AudioDeviceType, AudioManager, ScoAudioState,
    },
    registry::{DeviceRegistry, ProfileService},
    route::{mainloop, Collaborators, RouteContext, RouteProxy},
};
use log::LevelFilter;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::{spawn_local, JoinHandle, LocalSet},
};

pub fn start_test(f: impl Future<Output = ()>) {
    tokio_test::block_on(async move {
        init_logging(LevelFilter::Debug);
        tokio::time::pause();
        LocalSet::new().run_until(f).await;
    });
}

/// A route thread wired to mocks
pub struct TestRoute {
    pub proxy: RouteProxy,
    pub dispatcher: EventDispatcher,
    pub registry: Arc<DeviceRegistry>,
    pub adapter: Arc<MockBluetoothAdapter>,
    pub headset: Arc<MockHeadset>,
    pub le_audio: Arc<MockLeAudio>,
    pub audio_manager: Arc<MockAudioManager>,
    pub route_events: UnboundedReceiver<MockRouteEvents>,
    pub transition_events: UnboundedReceiver<MockTransitionEvents>,
    pub mainloop: JoinHandle<()>,
}

/// Build a route thread with default timeouts and every profile service
/// bound. Must be called from within `start_test`.
pub fn start_route() -> TestRoute {
    let adapter = Arc::new(MockBluetoothAdapter::new());
    let audio_manager = Arc::new(MockAudioManager::new());
    let (route_listener, route_events) = MockRouteListener::new();
    let (transition_listener, transition_events) = MockTransitionListener::new();
    let config = RouteConfig::default();

    let context = RouteContext::new(
        &config,
        Collaborators {
            adapter: adapter.clone(),
            audio_manager: audio_manager.clone(),
            timeouts: Arc::new(config.clone()),
            route_listener: Arc::new(route_listener),
            transition_listener: Arc::new(transition_listener),
        },
    );

    let headset = Arc::new(MockHeadset::new());
    let le_audio = Arc::new(MockLeAudio::new());
    let dispatcher = context.get_dispatcher();
    dispatcher.on_service_connected(ProfileService::Headset(headset.clone()));
    dispatcher.on_service_connected(ProfileService::HearingAid(Arc::new(MockHearingAid::new())));
    dispatcher.on_service_connected(ProfileService::LeAudio(le_audio.clone()));

    let proxy = context.get_proxy();
    let registry = context.registry();
    let mainloop = spawn_local(mainloop(context));

    TestRoute {
        proxy,
        dispatcher,
        registry,
        adapter,
        headset,
        le_audio,
        audio_manager,
        route_events,
        transition_events,
        mainloop,
    }
}

impl TestRoute {
    /// Report `address` connected over `profile`, and offer it to the audio
    /// service as a communication device
    pub async fn connect_device(&mut self, address: Address, profile: Profile) {
        self.dispatcher.on_platform_event(PlatformEvent::ConnectionStateChanged {
            profile,
            device: Device::new(address),
            state: ConnectionState::Connected,
        });
        let mut available = self.audio_manager.available_communication_devices();
        available.push(AudioDeviceInfo {
            id: available.len() as u32 + 100,
            device_type: AudioDeviceType::for_profile(profile),
            address: Some(address),
        });
        self.audio_manager.set_available(available);
        assert!(self.proxy.sync().await);
    }

    /// Report SCO to `address` in `state`
    pub fn sco_state(&self, address: Address, state: ScoAudioState) {
        self.headset.set_audio_state(address, state);
        self.dispatcher
            .on_platform_event(PlatformEvent::ScoAudioStateChanged { address, state });
    }

    /// Route listener events received so far
    pub fn route_events(&mut self) -> Vec<MockRouteEvents> {
        let mut out = vec![];
        while let Ok(event) = self.route_events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Transition listener events received so far
    pub fn transition_events(&mut self) -> Vec<MockTransitionEvents> {
        let mut out = vec![];
        while let Ok(event) = self.transition_events.try_recv() {
            out.push(event);
        }
        out
    }
}

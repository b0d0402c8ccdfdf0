//! Mocked listeners that turn each notification into a channel event

use tokio::sync::mpsc::{self, unbounded_channel, UnboundedReceiver};

use crate::{
    callbacks::{RouteListener, TransitionListener},
    core::address::Address,
    transition::AudioRoute,
};

/// Routes calls to RouteListener into a channel of MockRouteEvents
pub struct MockRouteListener(mpsc::UnboundedSender<MockRouteEvents>);

impl MockRouteListener {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new() -> (Self, UnboundedReceiver<MockRouteEvents>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }
}

/// Events representing calls to RouteListener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRouteEvents {
    /// RouteListener#on_device_list_changed invoked
    DeviceListChanged,
    /// RouteListener#on_active_device_present invoked
    ActiveDevicePresent,
    /// RouteListener#on_active_device_gone invoked
    ActiveDeviceGone,
    /// RouteListener#on_audio_connecting invoked
    AudioConnecting(Address),
    /// RouteListener#on_audio_connected invoked
    AudioConnected(Address),
    /// RouteListener#on_audio_disconnected invoked
    AudioDisconnected,
    /// RouteListener#on_unexpected_state_change invoked
    UnexpectedStateChange,
}

impl RouteListener for MockRouteListener {
    fn on_device_list_changed(&self) {
        self.0.send(MockRouteEvents::DeviceListChanged).unwrap();
    }

    fn on_active_device_present(&self) {
        self.0.send(MockRouteEvents::ActiveDevicePresent).unwrap();
    }

    fn on_active_device_gone(&self) {
        self.0.send(MockRouteEvents::ActiveDeviceGone).unwrap();
    }

    fn on_audio_connecting(&self, address: Address) {
        self.0.send(MockRouteEvents::AudioConnecting(address)).unwrap();
    }

    fn on_audio_connected(&self, address: Address) {
        self.0.send(MockRouteEvents::AudioConnected(address)).unwrap();
    }

    fn on_audio_disconnected(&self) {
        self.0.send(MockRouteEvents::AudioDisconnected).unwrap();
    }

    fn on_unexpected_state_change(&self) {
        self.0.send(MockRouteEvents::UnexpectedStateChange).unwrap();
    }
}

/// Routes calls to TransitionListener into a channel of MockTransitionEvents
pub struct MockTransitionListener(mpsc::UnboundedSender<MockTransitionEvents>);

impl MockTransitionListener {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new() -> (Self, UnboundedReceiver<MockTransitionEvents>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }
}

/// Events representing calls to TransitionListener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockTransitionEvents {
    /// TransitionListener#on_route_active invoked
    RouteActive(AudioRoute),
    /// TransitionListener#on_switch_to_baseline invoked
    SwitchToBaseline(Option<Address>),
}

impl TransitionListener for MockTransitionListener {
    fn on_route_active(&self, route: AudioRoute) {
        self.0.send(MockTransitionEvents::RouteActive(route)).unwrap();
    }

    fn on_switch_to_baseline(&self, exclude: Option<Address>) {
        self.0.send(MockTransitionEvents::SwitchToBaseline(exclude)).unwrap();
    }
}

//! Upstream notification interfaces. All methods are invoked from the route
//! thread, in the order the underlying events were processed.

use crate::{core::address::Address, transition::AudioRoute};

/// Observer of device availability and Bluetooth audio state
pub trait RouteListener: Send + Sync {
    /// The set of connected call-audio devices changed
    fn on_device_list_changed(&self);

    /// Some profile reports an active device again, after none did
    fn on_active_device_present(&self);

    /// No profile reports an active device anymore
    fn on_active_device_gone(&self);

    /// A connect request to `address` was accepted by the stack
    fn on_audio_connecting(&self, address: Address);

    /// Audio is flowing to `address`. Also re-issued when a connect is
    /// requested for the device that is already connected.
    fn on_audio_connected(&self, address: Address);

    /// Bluetooth audio went away
    fn on_audio_disconnected(&self);

    /// Audio state changed for a device we were not tracking
    fn on_unexpected_state_change(&self);
}

/// Observer of route transitions
pub trait TransitionListener: Send + Sync {
    /// A transition resolved; `route` is now in effect
    fn on_route_active(&self, route: AudioRoute);

    /// A transition failed; the baseline route should be selected, avoiding
    /// `exclude` if set
    fn on_switch_to_baseline(&self, exclude: Option<Address>);
}

// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bluetooth call-audio routing. Tracks the accessories connected over HFP,
//! hearing aid and LE Audio, moves call audio onto one of them through a
//! single route thread, and confirms route switches before reporting them
//! done.
//!
//! A typical host builds a `route::RouteContext`, binds profile services on
//! its registry, then spawns `route::mainloop` and feeds it through the
//! returned proxy and event dispatcher.

pub mod callbacks;
pub mod config;
pub mod core;
pub mod events;
pub mod platform;
pub mod registry;
pub mod route;
pub mod transition;
pub mod utils;

mod logging;

pub use logging::init_logging;

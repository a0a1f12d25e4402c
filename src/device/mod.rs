// src/device/mod.rs
//! Device process side: native display connection and event normalization.
//!
//! - backend: native display traits, event vocabulary and backend selection
//! - headless: in-process backend driven by injected events
//! - wayland: real compositor backend (feature `wayland`)
//! - session: `DeviceSession`, per-seat focus and command application
//! - runner: the device process main loop

pub mod backend;
pub mod headless;
pub mod runner;
pub mod session;
#[cfg(feature = "wayland")]
pub mod wayland;

pub use backend::{
    ConfiguredDisplay, NativeConnection, NativeDisplay, NativeEvent, NativeEventSource, OutputInfo,
    SurfaceController,
};
pub use headless::{HeadlessDisplay, HeadlessInjector, SurfaceCall, SurfaceLog};
pub use runner::{DeviceApp, DeviceTask};
pub use session::{DeviceSession, SessionState};

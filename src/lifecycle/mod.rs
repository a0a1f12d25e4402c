// src/lifecycle/mod.rs
//! Device process supervision.
//!
//! - launcher: starts/stops a device per epoch (`ChildProcessLauncher`)
//! - observer: spawn/crash/respawn state machine driving the channel

pub mod launcher;
pub mod observer;

pub use launcher::{ChildProcessLauncher, DeviceLauncher, DeviceSignal};
pub use observer::{LifecycleNotice, LifecycleState, ProcessLifecycleObserver};

#[cfg(test)]
mod tests;

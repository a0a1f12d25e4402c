// src/control/mod.rs
//! Control process side: window registry, focus, grab and event routing.

pub mod delegate;
pub mod registry;
pub mod window_manager;

pub use delegate::{NullDelegate, WindowDelegate};
pub use registry::{WindowEntry, WindowRegistry};
pub use window_manager::{ActivationOrigin, DispatchOutcome, WindowManager};

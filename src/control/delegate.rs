// src/control/delegate.rs

use crate::protocol::InputEvent;

/// Owner notifications for one window. Every hook defaults to a no-op.
///
/// Delegates are called on the UI loop only, from inside the window manager,
/// and cannot reach back into it; follow-up work goes through a task queue.
pub trait WindowDelegate {
    /// Pointer, keyboard and touch input routed to this window.
    fn on_input(&mut self, _event: &InputEvent) {}

    fn on_text_commit(&mut self, _text: &str) {}

    fn on_text_preedit(&mut self, _text: &str, _commit: &str) {}

    fn on_activation_changed(&mut self, _active: bool) {}

    fn on_capture_acquired(&mut self) {}

    fn on_lost_capture(&mut self) {}

    fn on_bounds_changed(&mut self, _width: u32, _height: u32) {}

    /// The compositor or user asked for the window to close. The window
    /// stays open until the owner calls `close_window`.
    fn on_close_requested(&mut self) {}

    fn on_unminimized(&mut self) {}
}

/// Delegate that ignores everything.
pub struct NullDelegate;

impl WindowDelegate for NullDelegate {}

// src/control/registry.rs
//! Arena of open windows keyed by `WindowHandle`.
//!
//! `order` is the stacking order, front = topmost. Parent links are handles
//! resolved through the table, so a closed parent simply stops resolving.

use crate::control::delegate::WindowDelegate;
use crate::error::BridgeError;
use crate::protocol::{Point, WidgetType, WindowHandle};
use std::collections::HashMap;

pub struct WindowEntry {
    pub parent: Option<WindowHandle>,
    pub kind: WidgetType,
    pub origin: Point,
    pub width: u32,
    pub height: u32,
    pub visible: bool,
    pub title: String,
    pub delegate: Box<dyn WindowDelegate>,
}

impl WindowEntry {
    pub fn new(
        parent: Option<WindowHandle>,
        kind: WidgetType,
        origin: Point,
        delegate: Box<dyn WindowDelegate>,
    ) -> Self {
        Self {
            parent,
            kind,
            origin,
            width: 0,
            height: 0,
            visible: false,
            title: String::new(),
            delegate,
        }
    }
}

#[derive(Default)]
pub struct WindowRegistry {
    order: Vec<WindowHandle>,
    entries: HashMap<WindowHandle, WindowEntry>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn get(&self, handle: WindowHandle) -> Option<&WindowEntry> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: WindowHandle) -> Option<&mut WindowEntry> {
        self.entries.get_mut(&handle)
    }

    /// Appends at the back of the stacking order.
    pub fn insert(&mut self, handle: WindowHandle, entry: WindowEntry) -> Result<(), BridgeError> {
        if self.entries.contains_key(&handle) {
            return Err(BridgeError::HandleInUse(handle));
        }
        self.entries.insert(handle, entry);
        self.order.push(handle);
        Ok(())
    }

    pub fn remove(&mut self, handle: WindowHandle) -> Option<WindowEntry> {
        let entry = self.entries.remove(&handle)?;
        self.order.retain(|h| *h != handle);
        Some(entry)
    }

    pub fn front(&self) -> Option<WindowHandle> {
        self.order.first().copied()
    }

    /// Moves `handle` to the front. Returns false if it is not registered.
    pub fn raise(&mut self, handle: WindowHandle) -> bool {
        let Some(index) = self.order.iter().position(|h| *h == handle) else {
            return false;
        };
        let handle = self.order.remove(index);
        self.order.insert(0, handle);
        true
    }

    /// The parent, if it is still open.
    pub fn parent_of(&self, handle: WindowHandle) -> Option<WindowHandle> {
        self.entries
            .get(&handle)
            .and_then(|entry| entry.parent)
            .filter(|parent| self.entries.contains_key(parent))
    }

    /// Handles front to back.
    pub fn order(&self) -> &[WindowHandle] {
        &self.order
    }

    /// Every handle, ordered so that each open parent precedes its children.
    pub fn parents_first(&self) -> Vec<WindowHandle> {
        let mut placed: Vec<WindowHandle> = Vec::with_capacity(self.order.len());
        let mut remaining: Vec<WindowHandle> = self.order.clone();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|handle| match self.parent_of(*handle) {
                Some(parent) if !placed.contains(&parent) => true,
                _ => {
                    placed.push(*handle);
                    false
                }
            });
            if remaining.len() == before {
                // Parent cycle; cannot be produced through the manager.
                placed.append(&mut remaining);
            }
        }
        placed
    }
}

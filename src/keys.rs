// src/keys.rs

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Keyboard modifiers active when an input event was produced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2; // Also known as Option on macOS
        const SUPER = 1 << 3; // Also known as Windows key or Command key
        const CAPS_LOCK = 1 << 4;
        const NUM_LOCK = 1 << 5;
    }
}

bitflags! {
    /// Pointer buttons held down at the time of an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ButtonFlags: u8 {
        const LEFT = 1 << 0;
        const MIDDLE = 1 << 1;
        const RIGHT = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

// Linux input event codes (linux/input-event-codes.h).
pub const BTN_LEFT: u32 = 0x110;
pub const BTN_RIGHT: u32 = 0x111;
pub const BTN_MIDDLE: u32 = 0x112;
pub const BTN_SIDE: u32 = 0x113;
pub const BTN_EXTRA: u32 = 0x114;

/// Maps a native button code to its flag. Unknown buttons map to no flag.
pub fn button_flag(code: u32) -> ButtonFlags {
    match code {
        BTN_LEFT => ButtonFlags::LEFT,
        BTN_RIGHT => ButtonFlags::RIGHT,
        BTN_MIDDLE => ButtonFlags::MIDDLE,
        BTN_SIDE => ButtonFlags::BACK,
        BTN_EXTRA => ButtonFlags::FORWARD,
        _ => ButtonFlags::empty(),
    }
}

// Real modifier bits as laid out by xkbcommon's default keymaps.
const XKB_SHIFT: u32 = 1 << 0;
const XKB_LOCK: u32 = 1 << 1;
const XKB_CONTROL: u32 = 1 << 2;
const XKB_MOD1: u32 = 1 << 3;
const XKB_MOD2: u32 = 1 << 4;
const XKB_MOD4: u32 = 1 << 6;

/// Converts the depressed/latched/locked masks of a keyboard modifiers
/// callback into abstract modifiers.
pub fn modifiers_from_xkb(depressed: u32, latched: u32, locked: u32) -> Modifiers {
    let active = depressed | latched;
    let mut mods = Modifiers::empty();
    mods.set(Modifiers::SHIFT, active & XKB_SHIFT != 0);
    mods.set(Modifiers::CONTROL, active & XKB_CONTROL != 0);
    mods.set(Modifiers::ALT, active & XKB_MOD1 != 0);
    mods.set(Modifiers::SUPER, active & XKB_MOD4 != 0);
    mods.set(Modifiers::CAPS_LOCK, locked & XKB_LOCK != 0);
    mods.set(Modifiers::NUM_LOCK, locked & XKB_MOD2 != 0);
    mods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_map_linux_button_codes() {
        assert_eq!(button_flag(BTN_LEFT), ButtonFlags::LEFT);
        assert_eq!(button_flag(BTN_EXTRA), ButtonFlags::FORWARD);
        assert!(button_flag(0x200).is_empty());
    }

    #[test]
    fn it_should_treat_locked_shift_as_caps_lock_only() {
        let mods = modifiers_from_xkb(XKB_CONTROL, 0, XKB_LOCK | XKB_MOD2);
        assert_eq!(
            mods,
            Modifiers::CONTROL | Modifiers::CAPS_LOCK | Modifiers::NUM_LOCK
        );
    }
}

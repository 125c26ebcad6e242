// kb.rs
//! PS/2 keyboard on IRQ 1: scancodes are decoded with `pc_keyboard`, typed
//! characters feed the active terminal's line editor and Alt+F1..F4 switch
//! terminals.

use lazy_static::lazy_static;
use log::trace;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyEvent, KeyState, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::vga::Console;

pub const DATA_PORT: u16 = 0x60;

lazy_static! {
    pub static ref KEYBOARD: Mutex<KeyboardState> = Mutex::new(KeyboardState::new());
}

pub struct KeyboardState {
    keyboard: Keyboard<layouts::Us104Key, ScancodeSet1>,
    alt: bool,
}

fn terminal_key(code: KeyCode) -> Option<usize> {
    match code {
        KeyCode::F1 => Some(0),
        KeyCode::F2 => Some(1),
        KeyCode::F3 => Some(2),
        KeyCode::F4 => Some(3),
        _ => None,
    }
}

impl KeyboardState {
    pub fn new() -> Self {
        Self {
            keyboard: Keyboard::new(layouts::Us104Key, ScancodeSet1, HandleControl::MapLettersToUnicode),
            alt: false,
        }
    }

    /// Consumes one raw byte from the controller. `terminals` bounds which
    /// Alt+Fn combinations are honoured.
    pub fn feed(&mut self, console: &Console, terminals: usize, scancode: u8) {
        let event = match self.keyboard.add_byte(scancode) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                trace!("dropped scancode {:#x}: {:?}", scancode, e);
                return;
            }
        };
        if self.handle_alt(console, terminals, &event) {
            return;
        }
        if let Some(DecodedKey::Unicode(ch)) = self.keyboard.process_keyevent(event) {
            if ch.is_ascii() {
                console.handle_input(ch as u8);
            }
        }
    }

    fn handle_alt(&mut self, console: &Console, terminals: usize, event: &KeyEvent) -> bool {
        match event.code {
            KeyCode::AltLeft | KeyCode::AltRight => {
                self.alt = event.state == KeyState::Down;
                true
            }
            code if self.alt => match terminal_key(code) {
                Some(term) if term < terminals => {
                    if event.state == KeyState::Down {
                        if console.switch(term).is_ok() && !console.has_shell(term) {
                            console.request_shell(term);
                        }
                    }
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

//! Key events to the byte sequences a remote shell expects.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press means to the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Forward these bytes to the remote PTY.
    Send(Vec<u8>),
    /// Leave the console (Ctrl+]).
    Quit,
}

/// Translate a key press. Keys with no terminal encoding yield `None`.
pub fn translate(key: &KeyEvent) -> Option<KeyAction> {
    if key.code == KeyCode::Char(']') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(KeyAction::Quit);
    }
    key_to_bytes(key).map(KeyAction::Send)
}

fn key_to_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                // Ctrl+A through Ctrl+Z
                let ctrl_char = (c.to_ascii_lowercase() as u8) - b'a' + 1;
                return Some(vec![ctrl_char]);
            }
            let mut buf = [0; 4];
            let s = c.encode_utf8(&mut buf);
            let mut bytes = s.as_bytes().to_vec();
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.insert(0, 0x1b);
            }
            Some(bytes)
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::PageUp => Some(b"\x1b[5~".to_vec()),
        KeyCode::PageDown => Some(b"\x1b[6~".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        KeyCode::Insert => Some(b"\x1b[2~".to_vec()),
        KeyCode::F(n) => {
            let seq: &[u8] = match n {
                1 => b"\x1bOP",
                2 => b"\x1bOQ",
                3 => b"\x1bOR",
                4 => b"\x1bOS",
                5 => b"\x1b[15~",
                6 => b"\x1b[17~",
                7 => b"\x1b[18~",
                8 => b"\x1b[19~",
                9 => b"\x1b[20~",
                10 => b"\x1b[21~",
                11 => b"\x1b[23~",
                12 => b"\x1b[24~",
                _ => return None,
            };
            Some(seq.to_vec())
        }
        _ => None,
    }
}

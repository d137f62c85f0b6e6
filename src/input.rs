//! Keyboard-to-terminal input encoding.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Arrow/home/end sequences switch from CSI to SS3 prefixes when the
/// remote application enables application-cursor mode.
fn cursor_key(app_cursor: bool, csi: &'static [u8], ss3: &'static [u8]) -> &'static [u8] {
    if app_cursor { ss3 } else { csi }
}

// Basic xterm mappings
fn function_key(n: u8) -> Option<&'static [u8]> {
    Some(match n {
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
    })
}

fn encode_char(ch: char, modifiers: KeyModifiers) -> Option<Vec<u8>> {
    // Ctrl with an ASCII letter maps into the 0x01..=0x1a control range.
    if modifiers.contains(KeyModifiers::CONTROL) {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() {
            return Some(vec![lower as u8 - b'a' + 1]);
        }
    }
    let mut utf8 = [0u8; 4];
    let encoded = ch.encode_utf8(&mut utf8).as_bytes();
    if modifiers.contains(KeyModifiers::ALT) {
        // Alt/meta prefixes ESC.
        let mut seq = Vec::with_capacity(1 + encoded.len());
        seq.push(0x1b);
        seq.extend_from_slice(encoded);
        Some(seq)
    } else {
        Some(encoded.to_vec())
    }
}

/// Encode a key event to the byte sequence a remote PTY expects.
pub fn encode_key_event_to_ansi(app_cursor: bool, key: &KeyEvent) -> Option<Vec<u8>> {
    let seq: &'static [u8] = match key.code {
        KeyCode::Esc => b"\x1b",
        KeyCode::Enter => b"\r",
        KeyCode::Backspace => b"\x7f",
        KeyCode::Tab => b"\t",
        KeyCode::Up => cursor_key(app_cursor, b"\x1b[A", b"\x1bOA"),
        KeyCode::Down => cursor_key(app_cursor, b"\x1b[B", b"\x1bOB"),
        KeyCode::Right => cursor_key(app_cursor, b"\x1b[C", b"\x1bOC"),
        KeyCode::Left => cursor_key(app_cursor, b"\x1b[D", b"\x1bOD"),
        KeyCode::Home => cursor_key(app_cursor, b"\x1b[H", b"\x1bOH"),
        KeyCode::End => cursor_key(app_cursor, b"\x1b[F", b"\x1bOF"),
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::PageUp => b"\x1b[5~",
        KeyCode::PageDown => b"\x1b[6~",
        KeyCode::F(n) => function_key(n)?,
        KeyCode::Char(ch) => return encode_char(ch, key.modifiers),
        _ => return None,
    };
    Some(seq.to_vec())
}

/// The channel carries input as a string; every sequence we produce is
/// UTF-8 (escape prefixes are plain ASCII).
pub fn encode_key_event_to_string(app_cursor: bool, key: &KeyEvent) -> Option<String> {
    encode_key_event_to_ansi(app_cursor, key).and_then(|seq| String::from_utf8(seq).ok())
}

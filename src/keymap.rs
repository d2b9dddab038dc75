//! Key-name translation tables and coordinate scaling.
//!
//! The two real backends use disjoint key-naming conventions: the hypervisor
//! monitor wants QEMU qcodes ("ret", "esc", "spc"), the framebuffer helper
//! wants X11 keysym names ("Return", "Escape", "space"). Lookups are
//! case-insensitive and alias-tolerant; single printable characters fall
//! back to a derived rule when absent from the table. Unmapped keys are the
//! caller's problem to drop with a warning; translation never fails hard.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Full addressable range of QEMU absolute pointer events.
pub const QEMU_ABS_MAX: u32 = 32767;

static QEMU_KEYS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Editing / whitespace
    m.insert("enter", "ret");
    m.insert("return", "ret");
    m.insert("esc", "esc");
    m.insert("escape", "esc");
    m.insert("tab", "tab");
    m.insert("space", "spc");
    m.insert("backspace", "backspace");
    m.insert("delete", "delete");
    m.insert("del", "delete");
    m.insert("insert", "insert");
    m.insert("ins", "insert");
    // Navigation
    m.insert("up", "up");
    m.insert("down", "down");
    m.insert("left", "left");
    m.insert("right", "right");
    m.insert("home", "home");
    m.insert("end", "end");
    m.insert("pageup", "pgup");
    m.insert("pgup", "pgup");
    m.insert("pagedown", "pgdn");
    m.insert("pgdn", "pgdn");
    // Modifiers
    m.insert("ctrl", "ctrl");
    m.insert("control", "ctrl");
    m.insert("shift", "shift");
    m.insert("alt", "alt");
    m.insert("altgr", "alt_r");
    m.insert("meta", "meta_l");
    m.insert("super", "meta_l");
    m.insert("win", "meta_l");
    m.insert("cmd", "meta_l");
    // Function keys
    for (alias, code) in [
        ("f1", "f1"), ("f2", "f2"), ("f3", "f3"), ("f4", "f4"),
        ("f5", "f5"), ("f6", "f6"), ("f7", "f7"), ("f8", "f8"),
        ("f9", "f9"), ("f10", "f10"), ("f11", "f11"), ("f12", "f12"),
    ] {
        m.insert(alias, code);
    }
    // Punctuation
    m.insert(".", "dot");
    m.insert(",", "comma");
    m.insert("/", "slash");
    m.insert("\\", "backslash");
    m.insert(";", "semicolon");
    m.insert("'", "apostrophe");
    m.insert("-", "minus");
    m.insert("=", "equal");
    m.insert("`", "grave_accent");
    m.insert("[", "bracket_left");
    m.insert("]", "bracket_right");
    m
});

static VNC_KEYS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("enter", "Return");
    m.insert("return", "Return");
    m.insert("esc", "Escape");
    m.insert("escape", "Escape");
    m.insert("tab", "Tab");
    m.insert("space", "space");
    m.insert("backspace", "BackSpace");
    m.insert("delete", "Delete");
    m.insert("del", "Delete");
    m.insert("insert", "Insert");
    m.insert("ins", "Insert");
    m.insert("up", "Up");
    m.insert("down", "Down");
    m.insert("left", "Left");
    m.insert("right", "Right");
    m.insert("home", "Home");
    m.insert("end", "End");
    m.insert("pageup", "Prior");
    m.insert("pgup", "Prior");
    m.insert("pagedown", "Next");
    m.insert("pgdn", "Next");
    m.insert("ctrl", "Control_L");
    m.insert("control", "Control_L");
    m.insert("shift", "Shift_L");
    m.insert("alt", "Alt_L");
    m.insert("altgr", "Alt_R");
    m.insert("meta", "Super_L");
    m.insert("super", "Super_L");
    m.insert("win", "Super_L");
    m.insert("cmd", "Super_L");
    for (alias, code) in [
        ("f1", "F1"), ("f2", "F2"), ("f3", "F3"), ("f4", "F4"),
        ("f5", "F5"), ("f6", "F6"), ("f7", "F7"), ("f8", "F8"),
        ("f9", "F9"), ("f10", "F10"), ("f11", "F11"), ("f12", "F12"),
    ] {
        m.insert(alias, code);
    }
    m.insert(".", "period");
    m.insert(",", "comma");
    m.insert("/", "slash");
    m.insert("\\", "backslash");
    m.insert(";", "semicolon");
    m.insert("'", "apostrophe");
    m.insert("-", "minus");
    m.insert("=", "equal");
    m.insert("`", "grave");
    m.insert("[", "bracketleft");
    m.insert("]", "bracketright");
    m
});

/// US-layout shifted symbols and the unshifted key that produces them.
static SHIFTED_SYMBOLS: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for (symbol, base) in [
        ('!', '1'), ('@', '2'), ('#', '3'), ('$', '4'), ('%', '5'),
        ('^', '6'), ('&', '7'), ('*', '8'), ('(', '9'), (')', '0'),
        ('_', '-'), ('+', '='), ('{', '['), ('}', ']'), ('|', '\\'),
        (':', ';'), ('"', '\''), ('<', ','), ('>', '.'), ('?', '/'),
        ('~', '`'),
    ] {
        m.insert(symbol, base);
    }
    m
});

/// The unshifted key producing `c` on a US layout, when `c` is a shifted
/// symbol. Letters are not covered here; callers case-fold those directly.
pub fn shifted_base(c: char) -> Option<char> {
    SHIFTED_SYMBOLS.get(&c).copied()
}

/// Translate a logical key name to a QEMU qcode.
///
/// Returns `None` for unmapped keys; the caller logs and drops.
pub fn qemu_key(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    if let Some(code) = QEMU_KEYS.get(lower.as_str()) {
        return Some((*code).to_string());
    }
    single_char(&lower).map(|c| {
        // qcodes for letters and digits are the lowercase character itself
        c.to_ascii_lowercase().to_string()
    })
}

/// Translate a logical key name to an X11 keysym name.
pub fn vnc_key(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    if let Some(code) = VNC_KEYS.get(lower.as_str()) {
        return Some((*code).to_string());
    }
    // Keysyms are case-significant for letters, so keep the original char.
    single_char(name).map(|c| c.to_string())
}

fn single_char(name: &str) -> Option<char> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => Some(c),
        _ => None,
    }
}

/// Scale a logical coordinate into a backend's full addressable range.
///
/// `scaled = clamp(round(logical / viewport_dim * max_range), 0, max_range)`,
/// computed per axis with half-down rounding so the midpoint of an even
/// viewport lands on `max_range / 2`.
pub fn scale_coordinate(logical: i32, viewport_dim: u32, max_range: u32) -> u32 {
    if viewport_dim == 0 {
        return 0;
    }
    let scaled = f64::from(logical) / f64::from(viewport_dim) * f64::from(max_range);
    let rounded = (scaled - 0.5).ceil() as i64;
    rounded.clamp(0, i64::from(max_range)) as u32
}

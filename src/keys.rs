//! Byte sequences for common terminal keys, for driving interactive programs
//! attached to a PTY.

pub const KEY_ENTER: &str = "\r";
pub const KEY_ARROW_UP: &str = "\x1b[A";
pub const KEY_ARROW_DOWN: &str = "\x1b[B";
pub const KEY_ARROW_RIGHT: &str = "\x1b[C";
pub const KEY_ARROW_LEFT: &str = "\x1b[D";
pub const KEY_TAB: &str = "\t";
pub const KEY_ESCAPE: &str = "\x1b";
pub const KEY_BACKSPACE: &str = "\x7f";
/// Interrupt (Ctrl-C)
pub const KEY_CTRL_C: &str = "\x03";
/// End of input (Ctrl-D)
pub const KEY_CTRL_D: &str = "\x04";
/// Suspend (Ctrl-Z)
pub const KEY_CTRL_Z: &str = "\x1a";

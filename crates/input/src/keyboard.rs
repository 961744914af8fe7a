//! Keyboard hotkeys from the controlling terminal
//!
//! The terminal is in raw mode for the lifetime of the listener thread and
//! restored when it exits. Raw mode swallows SIGINT, so `Ctrl-C` is handled
//! here like ESC.

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, error, info, warn};

use crate::keymap::Keymap;
use crate::{Command, CommandSink, InputError};

/// How often the stop flag is checked while no key is pressed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal raw mode, left on drop
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self, InputError> {
        if !io::stdin().is_terminal() {
            return Err(InputError::NotATerminal);
        }
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal");
        }
    }
}

/// Command bound to a key press, if any
pub fn command_for_key(keymap: &Keymap, key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Esc => Some(Command::Shutdown),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Command::Shutdown)
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => keymap.lookup(c),
        _ => None,
    }
}

/// Hotkey listener on the terminal
pub struct KeyboardListener;

impl KeyboardListener {
    /// Put the terminal in raw mode and start the listener thread.
    ///
    /// The thread exits when `stop` is set, reading fails, or after it has
    /// dispatched [`Command::Shutdown`] (ESC or Ctrl-C).
    pub fn spawn<S: CommandSink + 'static>(
        keymap: Keymap,
        sink: Arc<S>,
        stop: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, InputError> {
        let raw_mode = RawMode::enable()?;
        let bound: String = keymap.keys().into_iter().collect();

        let handle = thread::Builder::new()
            .name("keyboard".to_string())
            .spawn(move || {
                let _raw_mode = raw_mode;
                if let Err(e) = listen(&keymap, sink.as_ref(), &stop) {
                    error!(error = %e, "Keyboard input stopped");
                }
            })?;

        info!(keys = %bound, "Keyboard hotkeys active, ESC to exit");
        Ok(handle)
    }
}

fn listen<S: CommandSink>(keymap: &Keymap, sink: &S, stop: &AtomicBool) -> io::Result<()> {
    while !stop.load(Ordering::SeqCst) {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        let Some(command) = command_for_key(keymap, &key) else {
            debug!(code = ?key.code, "Unbound key");
            continue;
        };

        debug!(%command, "Hotkey");
        if let Err(e) = sink.dispatch(command) {
            warn!(%command, error = %e, "Hotkey command failed");
        }
        if command == Command::Shutdown {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::CameraKey;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_bound_keys() {
        let keymap = Keymap::default();
        assert_eq!(
            command_for_key(&keymap, &press(KeyCode::Char('2'))),
            Some(Command::ShowCamera(CameraKey::Two))
        );
        assert_eq!(
            command_for_key(&keymap, &press(KeyCode::Char('0'))),
            Some(Command::BeginMultiviewSelection)
        );
        assert_eq!(command_for_key(&keymap, &press(KeyCode::Char('q'))), None);
    }

    #[test]
    fn test_escape_and_ctrl_c_shut_down() {
        let keymap = Keymap::default();
        assert_eq!(command_for_key(&keymap, &press(KeyCode::Esc)), Some(Command::Shutdown));
        assert_eq!(
            command_for_key(&keymap, &KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Command::Shutdown)
        );
        // Ctrl + a bound key is not the hotkey
        assert_eq!(
            command_for_key(&keymap, &KeyEvent::new(KeyCode::Char('1'), KeyModifiers::CONTROL)),
            None
        );
    }

    #[test]
    fn test_navigation_keys_and_releases_ignored() {
        let keymap = Keymap::default();
        assert_eq!(command_for_key(&keymap, &press(KeyCode::Up)), None);
        assert_eq!(command_for_key(&keymap, &press(KeyCode::F(5))), None);

        let mut release = press(KeyCode::Char('1'));
        release.kind = KeyEventKind::Release;
        assert_eq!(command_for_key(&keymap, &release), None);
    }
}

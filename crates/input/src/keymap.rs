//! Hotkey bindings

use std::collections::HashMap;

use camera_capture::CameraKey;

use crate::{Command, InputError};

/// Key used to start multiview selection
const SELECT_KEY: char = '0';

/// Character -> command table
///
/// Camera keys `1`-`3` and the selection key `0` are fixed; fan hotkeys are
/// added per channel. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: HashMap<char, Command>,
}

impl Default for Keymap {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        for key in CameraKey::ALL {
            let c = char::from(b'0' + key.number());
            bindings.insert(c, Command::ShowCamera(key));
        }
        bindings.insert(SELECT_KEY, Command::BeginMultiviewSelection);
        Self { bindings }
    }
}

impl Keymap {
    /// Bind `keys` to a fan channel's levels, in order (first key -> lowest)
    pub fn with_fan_keys(mut self, channel: u8, keys: &str, levels: &[u8]) -> Result<Self, InputError> {
        let keys: Vec<char> = keys.chars().map(|c| c.to_ascii_lowercase()).collect();
        if keys.len() > levels.len() {
            return Err(InputError::TooManyKeys {
                channel,
                keys: keys.len(),
                levels: levels.len(),
            });
        }

        for (&key, &percent) in keys.iter().zip(levels) {
            let command = Command::SetFan { channel, percent };
            if let Some(existing) = self.bindings.get(&key) {
                return Err(InputError::KeyConflict {
                    key,
                    first: existing.to_string(),
                    second: command.to_string(),
                });
            }
            self.bindings.insert(key, command);
        }
        Ok(self)
    }

    /// Command bound to a character
    pub fn lookup(&self, c: char) -> Option<Command> {
        self.bindings.get(&c.to_ascii_lowercase()).copied()
    }

    /// Bound characters, sorted
    pub fn keys(&self) -> Vec<char> {
        let mut keys: Vec<char> = self.bindings.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_STEP: &[u8] = &[0, 20, 40, 60, 80, 100];

    #[test]
    fn test_default_bindings() {
        let keymap = Keymap::default();
        assert_eq!(keymap.lookup('2'), Some(Command::ShowCamera(CameraKey::Two)));
        assert_eq!(keymap.lookup('0'), Some(Command::BeginMultiviewSelection));
        assert_eq!(keymap.lookup('4'), None);
    }

    #[test]
    fn test_fan_hotkeys() {
        let keymap = Keymap::default().with_fan_keys(0, "asdfgh", FIVE_STEP).unwrap();
        assert_eq!(keymap.lookup('a'), Some(Command::SetFan { channel: 0, percent: 0 }));
        assert_eq!(keymap.lookup('F'), Some(Command::SetFan { channel: 0, percent: 60 }));
        assert_eq!(keymap.lookup('h'), Some(Command::SetFan { channel: 0, percent: 100 }));
        assert_eq!(keymap.keys().len(), 10);
    }

    #[test]
    fn test_conflicts_rejected() {
        let err = Keymap::default().with_fan_keys(0, "a1", FIVE_STEP).unwrap_err();
        assert!(matches!(err, InputError::KeyConflict { key: '1', .. }));

        let keymap = Keymap::default().with_fan_keys(0, "asd", FIVE_STEP).unwrap();
        assert!(keymap.with_fan_keys(1, "zxa", &[0, 33, 66, 100]).is_err());

        let err = Keymap::default().with_fan_keys(2, "qwert", &[0, 33, 66, 100]).unwrap_err();
        assert!(matches!(err, InputError::TooManyKeys { channel: 2, keys: 5, levels: 4 }));
    }
}

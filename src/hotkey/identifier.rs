//! Canonical hotkey identifiers
//!
//! A hotkey is a set of modifiers plus at most one regular key. Its string
//! form is the sorted modifiers and then the regular key, joined by `+`,
//! so the same keys always produce the same string regardless of the order
//! they were pressed in.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::keys::{canonicalize, classify, KeyKind, Modifier};

/// Canonical, order-independent key combination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HotkeyId {
    modifiers: BTreeSet<Modifier>,
    key: Option<String>,
}

/// Errors parsing a hotkey string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("hotkey is empty")]
    Empty,

    #[error("hotkey '{0}' has an empty key between separators")]
    EmptySegment(String),

    #[error("hotkey has more than one non-modifier key: '{0}' and '{1}'")]
    MultipleKeys(String, String),
}

impl HotkeyId {
    /// Build an identifier from modifiers and an optional regular key.
    ///
    /// Returns `None` when both are empty. The key is canonicalised; a key that
    /// is itself a modifier is folded into the modifier set.
    pub fn new(
        modifiers: impl IntoIterator<Item = Modifier>,
        key: Option<&str>,
    ) -> Option<Self> {
        let mut modifiers: BTreeSet<Modifier> = modifiers.into_iter().collect();
        let key = match key.map(canonicalize) {
            Some(k) if k.is_empty() => None,
            Some(k) => match classify(&k) {
                KeyKind::Modifier(m) => {
                    modifiers.insert(m);
                    None
                }
                KeyKind::Regular => Some(k),
            },
            None => None,
        };

        if modifiers.is_empty() && key.is_none() {
            return None;
        }

        Some(Self { modifiers, key })
    }

}

impl fmt::Display for HotkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for modifier in &self.modifiers {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(modifier.as_str())?;
            first = false;
        }
        if let Some(key) = &self.key {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(key)?;
        }
        Ok(())
    }
}

impl FromStr for HotkeyId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let mut modifiers = BTreeSet::new();
        let mut key: Option<String> = None;

        for part in trimmed.split('+') {
            let token = canonicalize(part);
            if token.is_empty() {
                return Err(IdentifierError::EmptySegment(trimmed.to_string()));
            }
            match classify(&token) {
                KeyKind::Modifier(m) => {
                    modifiers.insert(m);
                }
                KeyKind::Regular => match &key {
                    Some(existing) if *existing != token => {
                        return Err(IdentifierError::MultipleKeys(existing.clone(), token));
                    }
                    _ => key = Some(token),
                },
            }
        }

        Ok(Self { modifiers, key })
    }
}

impl Serialize for HotkeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HotkeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_sorts_modifiers() {
        let id = HotkeyId::new([Modifier::Shift, Modifier::Ctrl], Some("A")).unwrap();
        assert_eq!(id.to_string(), "ctrl+shift+a");
    }

    #[test]
    fn test_modifier_only() {
        let id = HotkeyId::new([Modifier::Meta, Modifier::Alt], None).unwrap();
        assert_eq!(id.to_string(), "alt+meta");
    }

    #[test]
    fn test_display_borrows_key() {
        let text = String::from("Shift+Alt+PgUp");
        let id: HotkeyId = text.parse().unwrap();
        drop(text);
        let shown = format!("{}", id);
        assert_eq!(shown, "alt+shift+pageup");
    }

    #[test]
    fn test_regular_only() {
        let id = HotkeyId::new([], Some("F9")).unwrap();
        assert_eq!(id.to_string(), "f9");
    }

    #[test]
    fn test_empty_is_none() {
        assert!(HotkeyId::new([], None).is_none());
        assert!(HotkeyId::new([], Some("")).is_none());
    }

    #[test]
    fn test_parse_is_order_independent() {
        let a: HotkeyId = "shift+ctrl+a".parse().unwrap();
        let b: HotkeyId = "Control+A+Shift".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ctrl+shift+a");
    }

    #[test]
    fn test_parse_python_keyboard_names() {
        let id: HotkeyId = "ctrl+windows+f1".parse().unwrap();
        assert_eq!(id.to_string(), "ctrl+meta+f1");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<HotkeyId>(), Err(IdentifierError::Empty));
        assert!(matches!(
            "ctrl++a".parse::<HotkeyId>(),
            Err(IdentifierError::EmptySegment(_))
        ));
        assert_eq!(
            "ctrl+a+b".parse::<HotkeyId>(),
            Err(IdentifierError::MultipleKeys("a".into(), "b".into()))
        );
    }

    #[test]
    fn test_serde_as_string() {
        let id: HotkeyId = "alt+shift+m".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alt+shift+m\"");
        assert!(serde_json::from_str::<HotkeyId>("\"a+b\"").is_err());
    }
}

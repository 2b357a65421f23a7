//! Key names accepted by `keyDown` / `keyUp` steps, mapped to the fields
//! `Input.dispatchKeyEvent` needs for the page to see a real key.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub key_code: i64,
    /// Text produced on key down, for printable keys
    pub text: Option<String>,
}

const NAMED_KEYS: &[(&str, &str, i64, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Tab", "Tab", 9, None),
    ("Backspace", "Backspace", 8, None),
    ("Delete", "Delete", 46, None),
    ("Escape", "Escape", 27, None),
    ("Space", "Space", 32, Some(" ")),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowRight", "ArrowRight", 39, None),
    ("Home", "Home", 36, None),
    ("End", "End", 35, None),
    ("PageUp", "PageUp", 33, None),
    ("PageDown", "PageDown", 34, None),
    ("Shift", "ShiftLeft", 16, None),
    ("Control", "ControlLeft", 17, None),
    ("Alt", "AltLeft", 18, None),
    ("Meta", "MetaLeft", 91, None),
];

impl KeyDefinition {
    /// Look up a key by its DOM `key` name. Single characters map to their
    /// letter/digit key; unknown names are passed through with no key code.
    pub fn lookup(name: &str) -> Self {
        let canonical = if name == " " { "Space" } else { name };

        if let Some((key, code, key_code, text)) = NAMED_KEYS
            .iter()
            .find(|(key, ..)| key.eq_ignore_ascii_case(canonical))
        {
            let key = if *key == "Space" { " " } else { key };
            return Self {
                key: key.to_string(),
                code: code.to_string(),
                key_code: *key_code,
                text: text.map(str::to_string),
            };
        }

        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            let upper = c.to_ascii_uppercase();
            let (code, key_code) = if c.is_ascii_alphabetic() {
                (format!("Key{}", upper), upper as i64)
            } else if c.is_ascii_digit() {
                (format!("Digit{}", c), c as i64)
            } else {
                (String::new(), 0)
            };
            return Self {
                key: c.to_string(),
                code,
                key_code,
                text: Some(c.to_string()),
            };
        }

        Self {
            key: name.to_string(),
            code: name.to_string(),
            key_code: 0,
            text: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        let enter = KeyDefinition::lookup("Enter");
        assert_eq!(enter.key_code, 13);
        assert_eq!(enter.text.as_deref(), Some("\r"));

        let shift = KeyDefinition::lookup("shift");
        assert_eq!(shift.key, "Shift");
        assert_eq!(shift.code, "ShiftLeft");

        assert_eq!(KeyDefinition::lookup(" ").key, " ");
    }

    #[test]
    fn test_character_keys() {
        let a = KeyDefinition::lookup("a");
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.key_code, 65);
        assert_eq!(a.text.as_deref(), Some("a"));

        assert_eq!(KeyDefinition::lookup("7").code, "Digit7");
        assert_eq!(KeyDefinition::lookup("F13").key_code, 0);
    }
}

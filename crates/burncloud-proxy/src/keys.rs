//! Client API keys issued by the proxy operator.
//!
//! Keys are loaded once at startup and never change afterwards. Lookup is an
//! exact match on the full key string.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// Upper bound on leading key characters kept when a key is logged. Never
/// more than half the key is shown.
const MASK_VISIBLE_CHARS: usize = 8;

/// One client credential and the label it is audited under.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ApiKeyRecord {
    pub key: String,
    pub label: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ApiKeyRecord {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

impl fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("key", &mask(&self.key))
            .field("label", &self.label)
            .field("active", &self.active)
            .finish()
    }
}

/// Why a presented key was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid API key")]
    Unauthorized,
    #[error("API key is inactive")]
    Inactive { label: String },
}

/// Problems building a [`KeyStore`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("duplicate API key {0}")]
    Duplicate(String),
    #[error("API key entry has an empty key")]
    EmptyKey,
    #[error("malformed API key file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shape of the JSON key file: `{"keys":[{"key":"sk-...","label":"..."}]}`.
#[derive(Debug, Deserialize)]
struct KeyFile {
    keys: Vec<ApiKeyRecord>,
}

/// Immutable set of valid client keys.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    records: HashMap<String, ApiKeyRecord>,
}

impl KeyStore {
    /// Build a store, rejecting empty and duplicate keys.
    pub fn new(records: impl IntoIterator<Item = ApiKeyRecord>) -> Result<Self, KeyStoreError> {
        let mut map = HashMap::new();
        for record in records {
            if record.key.is_empty() {
                return Err(KeyStoreError::EmptyKey);
            }
            if map.contains_key(&record.key) {
                return Err(KeyStoreError::Duplicate(mask(&record.key)));
            }
            map.insert(record.key.clone(), record);
        }
        Ok(Self { records: map })
    }

    /// Look up `presented`. Anything that is not an exact match, including
    /// empty or absurdly long input, is `Unauthorized`.
    pub fn validate(&self, presented: &str) -> Result<&ApiKeyRecord, KeyError> {
        let record = self.records.get(presented).ok_or(KeyError::Unauthorized)?;
        if !record.active {
            return Err(KeyError::Inactive {
                label: record.label.clone(),
            });
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse the JSON key file format.
pub fn parse_key_file(contents: &str) -> Result<Vec<ApiKeyRecord>, KeyStoreError> {
    let file: KeyFile = serde_json::from_str(contents)?;
    Ok(file.keys)
}

/// Parse a `key=label,key=label` list. A bare `key` is labelled `key-{n}`
/// by its 1-based position in the list. Blank entries are skipped.
pub fn parse_key_list(list: &str) -> Result<Vec<ApiKeyRecord>, KeyStoreError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| {
            let (key, label) = match entry.split_once('=') {
                Some((key, label)) => (key.trim(), label.trim().to_string()),
                None => (entry, format!("key-{}", index + 1)),
            };
            if key.is_empty() {
                return Err(KeyStoreError::EmptyKey);
            }
            Ok(ApiKeyRecord::new(key, label))
        })
        .collect()
}

/// Loggable form of a secret: at most the first 8 characters, and never more
/// than half of it, followed by `***`.
pub fn mask(secret: &str) -> String {
    let shown = MASK_VISIBLE_CHARS.min(secret.chars().count() / 2);
    let visible: String = secret.chars().take(shown).collect();
    format!("{visible}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyStore {
        KeyStore::new([
            ApiKeyRecord::new("sk-client-veo-001", "VIP Client A"),
            ApiKeyRecord::new("sk-burncloud-admin", "Admin Test"),
            ApiKeyRecord::new("sk-retired", "Old Client").inactive(),
        ])
        .unwrap()
    }

    #[test]
    fn valid_key_returns_its_record() {
        let store = store();
        let record = store.validate("sk-client-veo-001").unwrap();
        assert_eq!(record.label, "VIP Client A");
    }

    #[test]
    fn unknown_key_is_unauthorized() {
        assert_eq!(store().validate("sk-bad"), Err(KeyError::Unauthorized));
    }

    #[test]
    fn empty_key_is_unauthorized() {
        assert_eq!(store().validate(""), Err(KeyError::Unauthorized));
    }

    #[test]
    fn prefix_and_suffix_do_not_match() {
        let store = store();
        assert_eq!(store.validate("sk-client-veo-00"), Err(KeyError::Unauthorized));
        assert_eq!(store.validate("sk-client-veo-0011"), Err(KeyError::Unauthorized));
        assert_eq!(store.validate(" sk-client-veo-001"), Err(KeyError::Unauthorized));
        assert_eq!(store.validate("SK-CLIENT-VEO-001"), Err(KeyError::Unauthorized));
    }

    #[test]
    fn huge_or_binary_input_is_just_unauthorized() {
        let store = store();
        let huge = "x".repeat(1 << 20);
        assert_eq!(store.validate(&huge), Err(KeyError::Unauthorized));
        assert_eq!(store.validate("\u{0}\u{ffff}\t"), Err(KeyError::Unauthorized));
    }

    #[test]
    fn inactive_key_is_refused_with_label() {
        assert_eq!(
            store().validate("sk-retired"),
            Err(KeyError::Inactive {
                label: "Old Client".to_string()
            })
        );
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = KeyStore::new([
            ApiKeyRecord::new("sk-dup-key-123", "a"),
            ApiKeyRecord::new("sk-dup-key-123", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, KeyStoreError::Duplicate(ref masked) if masked == "sk-dup-***"));
    }

    #[test]
    fn empty_key_entry_is_rejected() {
        assert!(matches!(
            KeyStore::new([ApiKeyRecord::new("", "nobody")]),
            Err(KeyStoreError::EmptyKey)
        ));
    }

    #[test]
    fn parses_key_file_with_default_active() {
        let records = parse_key_file(
            r#"{"keys":[
                {"key":"sk-client-veo-001","label":"VIP Client A"},
                {"key":"sk-old","label":"Old","active":false}
            ]}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].active);
        assert!(!records[1].active);
    }

    #[test]
    fn malformed_key_file_is_a_parse_error() {
        assert!(matches!(
            parse_key_file(r#"{"keys":"nope"}"#),
            Err(KeyStoreError::Parse(_))
        ));
    }

    #[test]
    fn parses_key_list() {
        let records = parse_key_list(" sk-a=Client A , sk-bare-key-xyz ,, ").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "sk-a");
        assert_eq!(records[0].label, "Client A");
        assert_eq!(records[1].key, "sk-bare-key-xyz");
        assert_eq!(records[1].label, "key-2");
    }

    #[test]
    fn bare_key_label_carries_no_part_of_the_key() {
        let records = parse_key_list("sk-zq81,sk-zq82=Named,sk-zq83").unwrap();
        let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["key-1", "Named", "key-3"]);
        for record in &records {
            assert!(!record.label.contains("sk-"));
        }
    }

    #[test]
    fn key_list_entry_without_key_is_rejected() {
        assert!(matches!(parse_key_list("=label"), Err(KeyStoreError::EmptyKey)));
    }

    #[test]
    fn mask_keeps_short_prefix_and_respects_char_boundaries() {
        assert_eq!(mask("sk-client-veo-001"), "sk-clien***");
        assert_eq!(mask("ключ-секрет-длинный"), "ключ-сек***");
    }

    #[test]
    fn mask_never_reveals_more_than_half_of_a_short_key() {
        assert_eq!(mask("sk-short"), "sk-s***");
        assert_eq!(mask("abc"), "a***");
        assert_eq!(mask("x"), "***");
        assert_eq!(mask(""), "***");
    }

    #[test]
    fn debug_output_never_contains_the_key() {
        let record = ApiKeyRecord::new("sk-client-veo-001", "VIP Client A");
        let debug = format!("{record:?}");
        assert!(!debug.contains("sk-client-veo-001"));
        assert!(debug.contains("VIP Client A"));
    }
}

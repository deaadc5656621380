//! Account schema and the migration applied to every loaded document.
//!
//! The on-disk field names (`senha`, `tema`, `avatar`, `anotacoes`) are the
//! ones existing `usuarios.json` files already use. Two historical shapes are
//! accepted on read:
//!
//! ```text
//! { "alice": "s3cret" }                                   legacy: bare secret
//! { "alice": { "senha": "s3cret", "tema": "azul", ... } } structured record
//! ```
//!
//! Normalization upgrades the first shape and fills absent fields of the
//! second, so code past [`decode`] only ever sees complete [`Account`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_THEME: &str = "vermelho";

pub(crate) const FIELD_SECRET: &str = "senha";
pub(crate) const FIELD_THEME: &str = "tema";
pub(crate) const FIELD_AVATAR: &str = "avatar";

/// Raw document as stored: usernames to account-shaped JSON values.
pub type RawDocument = Map<String, Value>;

/// Normalized accounts keyed by username.
pub type Accounts = BTreeMap<String, Account>;

/// The persisted record of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Compared verbatim on login.
    #[serde(rename = "senha")]
    pub password_secret: String,
    #[serde(rename = "tema")]
    pub theme: String,
    /// Stored filename of the latest accepted avatar upload.
    #[serde(rename = "avatar")]
    pub avatar_ref: Option<String>,
    /// Absent until the first note is appended. A stored `null` reads as
    /// absent and is omitted on the next save.
    #[serde(rename = "anotacoes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
    /// Fields written by newer versions, kept untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Account {
    pub fn new(password_secret: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            password_secret: password_secret.into(),
            theme: theme.into(),
            avatar_ref: None,
            notes: None,
            extra: Map::new(),
        }
    }

    pub fn notes(&self) -> &[String] {
        self.notes.as_deref().unwrap_or(&[])
    }

    pub fn push_note(&mut self, text: String) {
        self.notes.get_or_insert_with(Vec::new).push(text);
    }
}

/// What a normalization pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Bare-string entries turned into records.
    pub upgraded_legacy: usize,
    /// Absent fields filled with defaults on structured records.
    pub filled_fields: usize,
}

impl NormalizeReport {
    pub fn changed(&self) -> bool {
        self.upgraded_legacy > 0 || self.filled_fields > 0
    }
}

/// Upgrade legacy entries and fill absent fields in place. A `null` secret
/// or theme counts as absent.
///
/// Entries that are neither a string nor an object cannot be interpreted and
/// are reported as an error. The document may then be partially normalized
/// and must not be persisted.
pub fn normalize(raw: &mut RawDocument, default_theme: &str) -> Result<NormalizeReport, String> {
    let mut report = NormalizeReport::default();

    for (username, entry) in raw.iter_mut() {
        match entry {
            Value::String(secret) => {
                let secret = std::mem::take(secret);
                *entry = legacy_record(secret, default_theme);
                report.upgraded_legacy += 1;
            }
            Value::Object(record) => {
                // `null` is a legal avatar but not a legal secret or theme.
                let defaults = [
                    (FIELD_SECRET, Value::String(String::new()), false),
                    (FIELD_THEME, Value::String(default_theme.to_string()), false),
                    (FIELD_AVATAR, Value::Null, true),
                ];
                for (field, default, null_ok) in defaults {
                    let missing = match record.get(field) {
                        None => true,
                        Some(Value::Null) => !null_ok,
                        Some(_) => false,
                    };
                    if missing {
                        record.insert(field.to_string(), default);
                        report.filled_fields += 1;
                    }
                }
            }
            other => {
                return Err(format!(
                    "entry for {username:?} is a {}, expected an account object or a secret string",
                    json_kind(other)
                ));
            }
        }
    }

    Ok(report)
}

fn legacy_record(secret: String, default_theme: &str) -> Value {
    let mut record = Map::new();
    record.insert(FIELD_SECRET.to_string(), Value::String(secret));
    record.insert(FIELD_THEME.to_string(), Value::String(default_theme.to_string()));
    record.insert(FIELD_AVATAR.to_string(), Value::Null);
    Value::Object(record)
}

/// Convert a normalized raw document into typed accounts.
pub fn decode(raw: RawDocument) -> Result<Accounts, String> {
    raw.into_iter()
        .map(|(username, value)| {
            serde_json::from_value::<Account>(value)
                .map(|account| (username.clone(), account))
                .map_err(|err| format!("account {username:?}: {err}"))
        })
        .collect()
}

pub fn encode(accounts: &Accounts) -> serde_json::Result<RawDocument> {
    accounts
        .iter()
        .map(|(username, account)| {
            serde_json::to_value(account).map(|value| (username.clone(), value))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn raw(value: Value) -> RawDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_legacy_string_becomes_record() {
        let mut doc = raw(json!({ "alice": "p1" }));
        let report = normalize(&mut doc, DEFAULT_THEME).unwrap();

        assert_eq!(report.upgraded_legacy, 1);
        assert!(report.changed());
        assert_eq!(
            Value::Object(doc),
            json!({ "alice": { "senha": "p1", "tema": "vermelho", "avatar": null } })
        );
    }

    #[test]
    fn test_missing_fields_are_filled() {
        let mut doc = raw(json!({ "bob": { "tema": "azul" } }));
        let report = normalize(&mut doc, DEFAULT_THEME).unwrap();

        assert_eq!(report.filled_fields, 2);
        let accounts = decode(doc).unwrap();
        let bob = &accounts["bob"];
        assert_eq!(bob.password_secret, "");
        assert_eq!(bob.theme, "azul");
        assert_eq!(bob.avatar_ref, None);
        assert!(bob.notes().is_empty());
    }

    #[test]
    fn test_null_secret_and_theme_are_filled() {
        let mut doc = raw(json!({
            "alice": { "senha": "p1", "tema": null },
            "bob": "p2",
            "carol": { "senha": null, "tema": "azul", "avatar": null }
        }));
        let report = normalize(&mut doc, DEFAULT_THEME).unwrap();

        assert_eq!(report.upgraded_legacy, 1);
        assert_eq!(report.filled_fields, 3);
        let accounts = decode(doc).unwrap();
        assert_eq!(accounts["alice"].theme, "vermelho");
        assert_eq!(accounts["alice"].password_secret, "p1");
        assert_eq!(accounts["bob"].password_secret, "p2");
        assert_eq!(accounts["carol"].password_secret, "");
        assert_eq!(accounts["carol"].avatar_ref, None);
    }

    #[test]
    fn test_null_notes_are_omitted_on_encode() {
        let doc = raw(json!({
            "dora": { "senha": "x", "tema": "azul", "avatar": null, "anotacoes": null }
        }));
        let accounts = decode(doc).unwrap();
        assert_eq!(accounts["dora"].notes, None);

        let encoded = encode(&accounts).unwrap();
        assert!(!encoded["dora"].as_object().unwrap().contains_key("anotacoes"));
    }

    #[test]
    fn test_explicit_null_avatar_is_not_a_change() {
        let mut doc = raw(json!({
            "carol": { "senha": "x", "tema": "verde", "avatar": null, "anotacoes": ["a"] }
        }));
        let report = normalize(&mut doc, DEFAULT_THEME).unwrap();
        assert!(!report.changed());
    }

    #[test]
    fn test_unexpected_entry_shape_is_rejected() {
        let mut doc = raw(json!({ "dave": 42 }));
        let err = normalize(&mut doc, DEFAULT_THEME).unwrap_err();
        assert!(err.contains("dave"));
        assert!(err.contains("number"));
    }

    #[test]
    fn test_wrong_field_type_fails_decode() {
        let mut doc = raw(json!({ "erin": { "senha": 7 } }));
        normalize(&mut doc, DEFAULT_THEME).unwrap();
        assert!(decode(doc).unwrap_err().contains("erin"));
    }

    #[test]
    fn test_unknown_fields_survive_encode() {
        let doc = raw(json!({
            "frank": { "senha": "x", "tema": "azul", "avatar": null, "email": "f@example.com" }
        }));
        let accounts = decode(doc.clone()).unwrap();
        assert_eq!(accounts["frank"].extra["email"], json!("f@example.com"));
        assert_eq!(encode(&accounts).unwrap(), doc);
    }

    fn entry_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-z0-9]{0,8}".prop_map(Value::String),
            (
                proptest::option::of("[a-z0-9]{0,8}"),
                proptest::option::of("[a-z]{1,8}"),
                proptest::option::of(proptest::option::of("[a-z]{1,8}\\.png")),
            )
                .prop_map(|(secret, theme, avatar)| {
                    let mut record = Map::new();
                    if let Some(secret) = secret {
                        record.insert(FIELD_SECRET.to_string(), json!(secret));
                    }
                    if let Some(theme) = theme {
                        record.insert(FIELD_THEME.to_string(), json!(theme));
                    }
                    if let Some(avatar) = avatar {
                        record.insert(FIELD_AVATAR.to_string(), json!(avatar));
                    }
                    Value::Object(record)
                }),
        ]
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            entries in proptest::collection::btree_map("[a-z]{1,6}", entry_strategy(), 0..8)
        ) {
            let mut doc: RawDocument = entries.into_iter().collect();
            normalize(&mut doc, DEFAULT_THEME).unwrap();
            let once = doc.clone();

            let second = normalize(&mut doc, DEFAULT_THEME).unwrap();
            prop_assert!(!second.changed());
            prop_assert_eq!(&doc, &once);

            // Every entry decodes into a complete account.
            let accounts = decode(doc).unwrap();
            prop_assert_eq!(accounts.len(), once.len());
        }
    }
}

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(Email);
id_newtype!(AbstractId);
id_newtype!(CommentId);

const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

impl AbstractId {
    /// The backend serialises an unsaved record's id as the nil UUID, and the
    /// editing form submits an empty string; neither names a stored abstract.
    pub fn is_assigned(&self) -> bool {
        let trimmed = self.0.trim();
        !trimmed.is_empty() && trimmed != NIL_UUID
    }
}

/// Recognised keys of `Abstract::attributes`.
pub mod attr {
    pub const COMPANY: &str = "company";
    pub const JOB_TITLE: &str = "jobtitle";
    pub const BIO: &str = "bio";
    pub const PICTURE_LINK: &str = "picture_link";
    pub const AUDIENCE: &str = "audience";
    pub const NOTES: &str = "notes";
}

/// One of the seven independent scoring axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "scores_a")]
    A,
    #[serde(rename = "scores_b")]
    B,
    #[serde(rename = "scores_c")]
    C,
    #[serde(rename = "scores_d")]
    D,
    #[serde(rename = "scores_e")]
    E,
    #[serde(rename = "scores_f")]
    F,
    #[serde(rename = "scores_g")]
    G,
}

impl Slot {
    pub const ALL: [Slot; 7] = [
        Slot::A,
        Slot::B,
        Slot::C,
        Slot::D,
        Slot::E,
        Slot::F,
        Slot::G,
    ];

    /// Slot whose presence marks an abstract as reviewed by a reviewer.
    pub const PRIMARY: Slot = Slot::A;

    pub fn field_name(self) -> &'static str {
        match self {
            Slot::A => "scores_a",
            Slot::B => "scores_b",
            Slot::C => "scores_c",
            Slot::D => "scores_d",
            Slot::E => "scores_e",
            Slot::F => "scores_f",
            Slot::G => "scores_g",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn default_label(self) -> Option<&'static str> {
        match self {
            Slot::A => Some("Skill Level"),
            Slot::B => Some("Abstract Quality"),
            Slot::C => Some("Relevance"),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown score slot '{0}'")]
pub struct UnknownSlot(pub String);

impl FromStr for Slot {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let letter = lower.strip_prefix("scores_").unwrap_or(&lower);
        match letter {
            "a" => Ok(Slot::A),
            "b" => Ok(Slot::B),
            "c" => Ok(Slot::C),
            "d" => Ok(Slot::D),
            "e" => Ok(Slot::E),
            "f" => Ok(Slot::F),
            "g" => Ok(Slot::G),
            _ => Err(UnknownSlot(s.to_string())),
        }
    }
}

/// A single reviewer's entry in a slot map. Entries that are not JSON numbers
/// are kept rather than rejected so one bad cell never fails a whole fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Numeric(f64),
    Invalid(serde_json::Value),
}

impl ScoreValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScoreValue::Numeric(value) if value.is_finite() => Some(*value),
            _ => None,
        }
    }
}

impl From<f64> for ScoreValue {
    fn from(value: f64) -> Self {
        ScoreValue::Numeric(value)
    }
}

pub type SlotScores = BTreeMap<Email, ScoreValue>;

/// Per-slot reviewer maps. `None` means the slot was never scored by anyone,
/// which is distinct from a map holding a score of zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoresBySlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_a: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_b: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_c: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_d: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_e: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_f: Option<SlotScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores_g: Option<SlotScores>,
}

impl ScoresBySlot {
    pub fn get(&self, slot: Slot) -> Option<&SlotScores> {
        self.field(slot).as_ref()
    }

    /// Records `email`'s score on `slot`, replacing any earlier entry.
    pub fn record(&mut self, slot: Slot, email: Email, score: f64) {
        self.field_mut(slot)
            .get_or_insert_with(SlotScores::new)
            .insert(email, ScoreValue::Numeric(score));
    }

    fn field(&self, slot: Slot) -> &Option<SlotScores> {
        match slot {
            Slot::A => &self.scores_a,
            Slot::B => &self.scores_b,
            Slot::C => &self.scores_c,
            Slot::D => &self.scores_d,
            Slot::E => &self.scores_e,
            Slot::F => &self.scores_f,
            Slot::G => &self.scores_g,
        }
    }

    fn field_mut(&mut self, slot: Slot) -> &mut Option<SlotScores> {
        match slot {
            Slot::A => &mut self.scores_a,
            Slot::B => &mut self.scores_b,
            Slot::C => &mut self.scores_c,
            Slot::D => &mut self.scores_d,
            Slot::E => &mut self.scores_e,
            Slot::F => &mut self.scores_f,
            Slot::G => &mut self.scores_g,
        }
    }
}

/// Author email to display name, in the order the backend returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authors(Vec<(Email, String)>);

impl Authors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(email: Email, name: impl Into<String>) -> Self {
        Self(vec![(email, name.into())])
    }

    /// Inserts or replaces; a replaced author keeps its original position.
    pub fn insert(&mut self, email: Email, name: impl Into<String>) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == email) {
            Some(entry) => entry.1 = name,
            None => self.0.push((email, name)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Email, &str)> {
        self.0.iter().map(|(email, name)| (email, name.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, name)| name.as_str())
    }

    pub fn emails(&self) -> impl Iterator<Item = &Email> {
        self.0.iter().map(|(email, _)| email)
    }

    pub fn first(&self) -> Option<(&Email, &str)> {
        self.0.first().map(|(email, name)| (email, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Authors {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (email, name) in &self.0 {
            map.serialize_entry(email, name)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Authors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AuthorsVisitor;

        impl<'de> Visitor<'de> for AuthorsVisitor {
            type Value = Authors;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of author email to display name")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Authors, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut authors = Authors::new();
                while let Some((email, name)) = access.next_entry::<Email, String>()? {
                    authors.insert(email, name);
                }
                Ok(authors)
            }

            fn visit_unit<E>(self) -> Result<Authors, E>
            where
                E: serde::de::Error,
            {
                Ok(Authors::new())
            }

            fn visit_none<E>(self) -> Result<Authors, E>
            where
                E: serde::de::Error,
            {
                Ok(Authors::new())
            }
        }

        deserializer.deserialize_any(AuthorsVisitor)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A conference submission under review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Abstract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AbstractId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Authors,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: BTreeMap<String, String>,
    #[serde(flatten)]
    pub scores: ScoresBySlot,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub scores_names: BTreeMap<String, String>,
}

impl Abstract {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The stored id, if the record has been persisted.
    pub fn assigned_id(&self) -> Option<&AbstractId> {
        self.id.as_ref().filter(|id| id.is_assigned())
    }
}

/// A reviewer comment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub abstract_id: AbstractId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CommentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    pub email: Email,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authors_keep_backend_order() {
        let authors: Authors =
            serde_json::from_str(r#"{"z@x.com":"Zed","a@x.com":"Alice","m@x.com":"Mo"}"#)
                .expect("authors");
        let names: Vec<&str> = authors.names().collect();
        assert_eq!(names, vec!["Zed", "Alice", "Mo"]);
        assert_eq!(
            serde_json::to_string(&authors).expect("json"),
            r#"{"z@x.com":"Zed","a@x.com":"Alice","m@x.com":"Mo"}"#
        );
    }

    #[test]
    fn null_collections_decode_as_empty() {
        let raw = r#"{
            "id": "X",
            "title": "t",
            "body": "b",
            "authors": null,
            "tags": null,
            "attributes": null,
            "scores_a": null,
            "scores_b": {"r@y.com": 70, "q@y.com": "seventy"},
            "scores_names": null
        }"#;
        let parsed: Abstract = serde_json::from_str(raw).expect("abstract");
        assert!(parsed.authors.is_empty());
        assert!(parsed.attributes.is_empty());
        assert!(parsed.scores.get(Slot::A).is_none());

        let slot_b = parsed.scores.get(Slot::B).expect("slot b present");
        assert_eq!(
            slot_b.get(&Email::from("r@y.com")).and_then(ScoreValue::as_number),
            Some(70.0)
        );
        assert_eq!(
            slot_b.get(&Email::from("q@y.com")).and_then(ScoreValue::as_number),
            None
        );
    }

    #[test]
    fn record_overwrites_instead_of_appending() {
        let mut scores = ScoresBySlot::default();
        scores.record(Slot::C, Email::from("r@y.com"), 10.0);
        scores.record(Slot::C, Email::from("r@y.com"), 90.0);
        let slot = scores.get(Slot::C).expect("slot");
        assert_eq!(slot.len(), 1);
        assert_eq!(
            slot.get(&Email::from("r@y.com")),
            Some(&ScoreValue::Numeric(90.0))
        );
    }

    #[test]
    fn slot_parses_letter_and_field_name() {
        assert_eq!("b".parse::<Slot>(), Ok(Slot::B));
        assert_eq!("scores_g".parse::<Slot>(), Ok(Slot::G));
        assert!("scores_h".parse::<Slot>().is_err());
        assert_eq!(
            serde_json::to_string(&Slot::A).expect("json"),
            r#""scores_a""#
        );
    }

    #[test]
    fn unknown_slot_error_names_the_input() {
        let err = "scores_h".parse::<Slot>().expect_err("no slot h");
        assert_eq!(err, UnknownSlot("scores_h".into()));
        assert_eq!(err.to_string(), "unknown score slot 'scores_h'");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "unknown score slot 'scores_h'");
    }

    #[test]
    fn nil_and_empty_ids_are_unassigned() {
        assert!(!AbstractId::from("").is_assigned());
        assert!(!AbstractId::from(NIL_UUID).is_assigned());
        assert!(AbstractId::from("X").is_assigned());
    }
}

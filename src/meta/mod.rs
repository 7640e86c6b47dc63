//! The unified metadata model.
//!
//! Every decoder populates a [`Metadata`](Metadata) container, so callers see
//! one schema no matter which format the tag came from. Fields are validated
//! on assignment; an attribute is either unset or satisfies its kind.

pub mod genres;
pub mod picture;
pub mod value;

use crate::err::ValidationError;
use crate::meta::picture::Picture;
use crate::meta::value::{validate, Kind, Value};
use image::ImageFormat;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// The language written into new comment and lyrics entries.
pub const LANG: &str = "eng";

/// The comment description iTunes uses to carry the gapless-playback flag.
pub const GAPLESS: &str = "iTunPGAP";

/// Every public field and its kind, in lexicographic order.
const FIELDS: &[(&str, Kind)] = &[
    ("album", Kind::Text),
    ("album_artist", Kind::Text),
    ("artist", Kind::Text),
    ("bpm", Kind::Uint16),
    ("comment", Kind::Text),
    ("compilation", Kind::Bool),
    ("composer", Kind::Text),
    ("disk", Kind::Uint16X2),
    ("encoder", Kind::Text),
    ("gapless", Kind::Bool),
    ("genre", Kind::Genre),
    ("grouping", Kind::Text),
    ("image", Kind::Image),
    ("lyrics", Kind::Text),
    ("name", Kind::Text),
    ("sort_album", Kind::Text),
    ("sort_album_artist", Kind::Text),
    ("sort_artist", Kind::Text),
    ("sort_composer", Kind::Text),
    ("sort_name", Kind::Text),
    ("sort_video_show", Kind::Text),
    ("track", Kind::Uint16X2),
    ("video_description", Kind::Text),
    ("video_episode", Kind::Uint32),
    ("video_episode_id", Kind::Text),
    ("video_season", Kind::Uint32),
    ("video_show", Kind::Text),
    ("volume", Kind::Volume),
    ("year", Kind::Uint16),
];

/// Looks up the kind of a public field.
pub fn kind_of(field: &str) -> Option<Kind> {
    FIELDS
        .binary_search_by_key(&field, |&(name, _)| name)
        .ok()
        .map(|at| FIELDS[at].1)
}

fn field_name(field: &str) -> Option<&'static str> {
    FIELDS
        .binary_search_by_key(&field, |&(name, _)| name)
        .ok()
        .map(|at| FIELDS[at].0)
}

/// Key of a comment or lyrics entry: language plus optional content
/// description.
pub type DictKey = (String, Option<String>);

/// Selects an entry in a content-keyed dictionary.
#[derive(Clone, Copy, Debug)]
pub enum Select<'a> {
    /// The entry with the lexicographically smallest key, whichever it is.
    Any,
    /// The entry with this content key under the default language.
    Key(Option<&'a str>),
}

/// Validated media metadata.
#[derive(Clone, Default)]
pub struct Metadata {
    values: BTreeMap<&'static str, Value>,
    comments: BTreeMap<DictKey, Value>,
    lyrics: BTreeMap<DictKey, Value>,
    images: BTreeMap<Option<String>, (Picture, u8)>,
    unknown: IndexMap<String, Vec<Vec<u8>>>,
    changed: BTreeSet<&'static str>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a public field, validating the value against the field's kind.
    ///
    /// An "empty" value per the kind's rules unsets the field. `comment`,
    /// `lyrics`, `gapless` and `image` route into their content-keyed
    /// dictionaries under the default keys.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        let name = field_name(field)
            .ok_or_else(|| ValidationError::new(field, "unknown attribute"))?;
        let value = value.into();

        match name {
            "comment" => self.set_comment(LANG, None, value),
            "lyrics" => self.set_lyrics(LANG, None, value),
            "gapless" => {
                let checked = validate(name, value, Kind::Bool)?;
                self.dict_assign(name, (LANG.to_string(), Some(GAPLESS.to_string())), checked);
                Ok(())
            }
            "image" => match validate(name, value, Kind::Image)? {
                Some(Value::Image(picture)) => self.set_image(None, picture, 3),
                _ => {
                    self.del_image(Select::Any);
                    Ok(())
                }
            },
            _ => {
                let kind = kind_of(name).unwrap();
                let checked = validate(name, value, kind)?;

                if self.values.get(name) != checked.as_ref() {
                    self.changed.insert(name);
                }

                match checked {
                    Some(value) => self.values.insert(name, value),
                    None => self.values.remove(name),
                };

                Ok(())
            }
        }
    }

    /// Reads a public field. Unset fields are `None`.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "comment" => self.comment_entry(Select::Key(None)).cloned(),
            "lyrics" => self.lyrics_entry(Select::Key(None)).cloned(),
            "gapless" => self
                .comments
                .get(&(LANG.to_string(), Some(GAPLESS.to_string())))
                .cloned(),
            "image" => self
                .image_entry(Select::Any)
                .map(|(picture, _)| Value::Image(picture.clone())),
            _ => self.values.get(field).cloned(),
        }
    }

    /// Unsets a public field.
    pub fn del(&mut self, field: &str) {
        match field {
            "comment" => self.del_comment(Select::Key(None)),
            "lyrics" => self.del_lyrics(Select::Key(None)),
            "gapless" => self.del_comment(Select::Key(Some(GAPLESS))),
            "image" => self.del_image(Select::Any),
            _ => {
                if let Some(name) = field_name(field) {
                    if self.values.remove(name).is_some() {
                        self.changed.insert(name);
                    }
                }
            }
        }
    }

    fn is_set(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// The names of all set public fields, in lexicographic order.
    pub fn public_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        FIELDS
            .iter()
            .map(|&(name, _)| name)
            .filter(move |name| self.is_set(name))
    }

    /// True once a field has been assigned since decode (or the last
    /// [`reset`](Metadata::reset)).
    pub fn modified(&self) -> bool {
        !self.changed.is_empty()
    }

    /// The modified field names, in lexicographic order.
    pub fn changed(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.changed.iter().copied()
    }

    pub fn reset(&mut self) {
        self.changed.clear();
    }

    // --- Content-keyed dictionaries ---

    fn dict_of(&self, field: &str) -> &BTreeMap<DictKey, Value> {
        match field {
            "lyrics" => &self.lyrics,
            _ => &self.comments,
        }
    }

    fn dict_of_mut(&mut self, field: &'static str) -> &mut BTreeMap<DictKey, Value> {
        match field {
            "lyrics" => &mut self.lyrics,
            _ => &mut self.comments,
        }
    }

    fn dict_key(&self, field: &str, select: Select) -> Option<DictKey> {
        match select {
            Select::Any => self.dict_of(field).keys().next().cloned(),
            Select::Key(key) => Some((LANG.to_string(), key.map(str::to_string))),
        }
    }

    fn dict_assign(&mut self, field: &'static str, key: DictKey, value: Option<Value>) {
        let dict = self.dict_of_mut(field);

        let before = match &value {
            Some(value) => dict.insert(key, value.clone()),
            None => dict.remove(&key),
        };

        if before != value {
            self.changed.insert(field);
        }
    }

    /// The comment under the default language and no description.
    pub fn comment(&self) -> Option<&str> {
        self.comment_entry(Select::Key(None))
            .and_then(Value::as_text)
    }

    /// Reads a comment entry.
    pub fn comment_entry(&self, select: Select) -> Option<&Value> {
        let key = self.dict_key("comment", select)?;
        self.comments.get(&key)
    }

    /// Writes a comment entry under `(lang, key)`.
    ///
    /// The key is itself validated as text; an empty value deletes the entry.
    /// A key equal to [`GAPLESS`](GAPLESS) coerces the value as a boolean.
    pub fn set_comment(
        &mut self,
        lang: &str,
        key: Option<&str>,
        value: impl Into<Value>,
    ) -> Result<(), ValidationError> {
        let key = self.text_key("comment", key)?;
        let kind = if key.as_deref() == Some(GAPLESS) {
            Kind::Bool
        } else {
            Kind::Text
        };

        let checked = validate("comment", value.into(), kind)?;
        self.dict_assign("comment", (lang.to_string(), key), checked);
        Ok(())
    }

    pub fn del_comment(&mut self, select: Select) {
        if let Some(key) = self.dict_key("comment", select) {
            self.dict_assign("comment", key, None);
        }
    }

    /// The lyrics under the default language and no description.
    pub fn lyrics(&self) -> Option<&str> {
        self.lyrics_entry(Select::Key(None))
            .and_then(Value::as_text)
    }

    pub fn lyrics_entry(&self, select: Select) -> Option<&Value> {
        let key = self.dict_key("lyrics", select)?;
        self.lyrics.get(&key)
    }

    pub fn set_lyrics(
        &mut self,
        lang: &str,
        key: Option<&str>,
        value: impl Into<Value>,
    ) -> Result<(), ValidationError> {
        let key = self.text_key("lyrics", key)?;
        let checked = validate("lyrics", value.into(), Kind::Text)?;
        self.dict_assign("lyrics", (lang.to_string(), key), checked);
        Ok(())
    }

    pub fn del_lyrics(&mut self, select: Select) {
        if let Some(key) = self.dict_key("lyrics", select) {
            self.dict_assign("lyrics", key, None);
        }
    }

    /// The gapless-playback flag, riding in a comment entry keyed
    /// [`GAPLESS`](GAPLESS).
    pub fn gapless(&self) -> Option<bool> {
        self.comments
            .get(&(LANG.to_string(), Some(GAPLESS.to_string())))
            .and_then(Value::as_bool)
    }

    /// Any one attached image.
    pub fn image(&self) -> Option<&Picture> {
        self.image_entry(Select::Any).map(|(picture, _)| picture)
    }

    /// Reads an image entry along with its picture type.
    pub fn image_entry(&self, select: Select) -> Option<(&Picture, u8)> {
        let key = match select {
            Select::Any => self.images.keys().next().cloned()?,
            Select::Key(key) => key.map(str::to_string),
        };

        self.images
            .get(&key)
            .map(|(picture, ptype)| (picture, *ptype))
    }

    /// Stores an image under a content key with an ID3v2 picture type.
    pub fn set_image(
        &mut self,
        key: Option<&str>,
        picture: Picture,
        ptype: u8,
    ) -> Result<(), ValidationError> {
        let key = self.text_key("image", key)?;
        self.images.insert(key, (picture, ptype));
        self.changed.insert("image");
        Ok(())
    }

    pub fn del_image(&mut self, select: Select) {
        let key = match select {
            Select::Any => match self.images.keys().next().cloned() {
                Some(key) => key,
                None => return,
            },
            Select::Key(key) => key.map(str::to_string),
        };

        if self.images.remove(&key).is_some() {
            self.changed.insert("image");
        }
    }

    /// Scrubs a content key through text validation; empty keys become
    /// `None`.
    fn text_key(&self, field: &str, key: Option<&str>) -> Result<Option<String>, ValidationError> {
        Ok(match key {
            None => None,
            Some(key) => match validate(field, Value::from(key), Kind::Text)? {
                Some(Value::Text(key)) => Some(key),
                _ => None,
            },
        })
    }

    pub(crate) fn comments(&self) -> &BTreeMap<DictKey, Value> {
        &self.comments
    }

    pub(crate) fn lyrics_map(&self) -> &BTreeMap<DictKey, Value> {
        &self.lyrics
    }

    pub(crate) fn images(&self) -> &BTreeMap<Option<String>, (Picture, u8)> {
        &self.images
    }

    // --- Unrecognized frames ---

    pub(crate) fn push_unknown(&mut self, id: &str, data: Vec<u8>) {
        self.unknown
            .entry(id.to_string())
            .or_insert_with(Vec::new)
            .push(data);
    }

    /// Raw payloads of unrecognized ID3v2 frames, keyed by frame id in the
    /// order they were read.
    pub fn unknown(&self) -> &IndexMap<String, Vec<Vec<u8>>> {
        &self.unknown
    }

    pub fn has_unknown(&self) -> bool {
        !self.unknown.is_empty()
    }

    // --- Equality helpers ---

    /// A cheap image fingerprint: leading bytes, dimensions and format.
    pub fn image_sample(&self) -> Option<(Vec<u8>, (u32, u32), ImageFormat)> {
        self.image()
            .map(|picture| (picture.sample().to_vec(), picture.size(), picture.format()))
    }

    /// The volume rounded to one decimal place for comparison. Unset volume
    /// compares as "0.0".
    pub fn rounded_volume(&self) -> String {
        match self.get("volume").and_then(|value| value.as_volume()) {
            Some(volume) => format!("{:.1}", volume),
            None => "0.0".to_string(),
        }
    }

    fn fmt_value(value: &Value) -> String {
        match value {
            Value::Text(val) => val.clone(),
            Value::Bytes(val) => format!("{:?}", val),
            Value::Int(val) => val.to_string(),
            Value::Float(val) => format!("{:.1}", val),
            Value::Bool(true) => "Yes".to_string(),
            Value::Bool(false) => "No".to_string(),
            Value::Pair(a, b) => format!("{}/{}", a, b),
            Value::Image(picture) => format!("{:?}", picture),
        }
    }
}

impl PartialEq for Metadata {
    /// Public fields only; images compare by sample and volume by its
    /// rounded string.
    fn eq(&self, other: &Self) -> bool {
        FIELDS.iter().all(|&(name, kind)| match kind {
            Kind::Image => self.image_sample() == other.image_sample(),
            Kind::Volume => self.rounded_volume() == other.rounded_volume(),
            _ => self.get(name) == other.get(name),
        })
    }
}

impl Display for Metadata {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut first = true;

        for name in self.public_fields() {
            if let Some(value) = self.get(name) {
                if !first {
                    write![f, ", "]?;
                }
                write![f, "{}={}", name, Self::fmt_value(&value)]?;
                first = false;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write![f, "<Metadata: {}>", self]
    }
}

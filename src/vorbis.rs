//! VorbisComment payloads.
//!
//! A length-prefixed UTF-8 vendor string, then a count of `key=value`
//! entries. Keys are case-insensitive and come in many historical spellings;
//! the alias table folds them all onto the schema's field names.

use crate::core::io::BufStream;
use crate::err::Result;
use crate::meta::value::Value;
use crate::meta::Metadata;
use log::warn;

/// Folds a lowercased comment key onto a schema field.
fn alias(key: &str) -> Option<&'static str> {
    Some(match key {
        "album" => "album",
        "album artist" | "album_artist" | "albumartist" => "album_artist",
        "artist" => "artist",
        "beats per minute" | "beats_per_minute" | "beatsperminute" | "bpm" | "tempo" => "bpm",
        "comment" | "comments" => "comment",
        "compilation" => "compilation",
        "composer" => "composer",
        "date" | "year" => "year",
        "disc" | "disc number" | "disc_number" | "discnumber" | "disk" | "disk number"
        | "disk_number" | "disknumber" => "disk",
        "encoder" => "encoder",
        "gapless" | "gapless playback" | "gapless_playback" | "gaplessplayback" => "gapless",
        "genre" => "genre",
        "grouping" => "grouping",
        "lyrics" => "lyrics",
        "name" | "title" => "name",
        "sort album" | "sort_album" | "sortalbum" => "sort_album",
        "sort album artist" | "sort_album_artist" | "sortalbumartist" => "sort_album_artist",
        "sort artist" | "sort_artist" | "sortartist" => "sort_artist",
        "sort composer" | "sort_composer" | "sortcomposer" => "sort_composer",
        "sort name" | "sort_name" | "sortname" => "sort_name",
        "sort video show" | "sort_video_show" | "sortvideoshow" => "sort_video_show",
        "track" | "track number" | "track_number" | "tracknumber" => "track",
        "video description" | "video_description" | "videodescription" => "video_description",
        "video episode" | "video_episode" | "videoepisode" => "video_episode",
        "video episode id" | "video_episode_id" | "videoepisodeid" => "video_episode_id",
        "video season" | "video_season" | "videoseason" => "video_season",
        "video show" | "video_show" | "videoshow" => "video_show",
        "volume" => "volume",
        _ => return None,
    })
}

/// Parses one VorbisComment payload into `meta`.
///
/// Unknown keys and rejected values are skipped. Trailing data past the
/// declared entries (such as the OGG framing bit) is ignored.
pub(crate) fn parse_comments(meta: &mut Metadata, stream: &mut BufStream) -> Result<()> {
    let vendor_len = stream.read_le_u32()? as usize;
    let vendor = String::from_utf8_lossy(stream.slice(vendor_len)?).into_owned();
    let _ = meta.set("encoder", vendor);

    let count = stream.read_le_u32()?;

    for _ in 0..count {
        let len = stream.read_le_u32()? as usize;
        let entry = String::from_utf8_lossy(stream.slice(len)?).into_owned();

        let mut split = entry.splitn(2, '=');
        let key = split.next().unwrap_or("").to_lowercase();
        let value = match split.next() {
            Some(value) => value,
            None => {
                warn!("comment entry with no separator");
                continue;
            }
        };

        let attr = match alias(&key) {
            Some(attr) => attr,
            None => continue,
        };

        let value = if attr == "genre" {
            genre_value(value)
        } else {
            Value::Text(value.to_string())
        };

        if let Err(err) = meta.set(attr, value) {
            warn!("skipping comment entry ({})", err);
        }
    }

    Ok(())
}

/// Numeric genres index the genre table, both bare ("21") and in the ID3
/// parenthesised form ("(21)").
fn genre_value(value: &str) -> Value {
    let digits = value
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(value);

    if !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()) {
        if let Ok(index) = digits.parse::<i64>() {
            return Value::Int(index);
        }
    }

    Value::Text(value.to_string())
}

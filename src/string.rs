//! Tag string handling.

use crate::core::io::BufStream;
use log::warn;

/// The text encodings found in ID3v2 text data.
///
/// ID3v2.2 and ID3v2.3 only define [`Latin1`](Encoding::Latin1) and
/// [`Utf16`](Encoding::Utf16); ID3v2.4 adds the other two. When writing, the
/// minimal encoding for the text is chosen with [`pick`](pick).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// ISO-8859-1. Code points above U+00FF cannot be represented and become
    /// "?" on write.
    Latin1,
    /// UTF-16 with a BOM. Written as UTF-16LE with a `0xFF 0xFE` BOM.
    Utf16,
    /// UTF-16BE with no BOM.
    Utf16Be,
    /// UTF-8.
    Utf8,
}

impl Encoding {
    /// The width of this encoding's NUL terminator.
    pub(crate) fn nul_size(self) -> usize {
        match self {
            Self::Latin1 | Self::Utf8 => 1,
            Self::Utf16 | Self::Utf16Be => 2,
        }
    }
}

/// Picks the smallest encoding able to represent `string`: Latin-1 when every
/// char fits in a byte, UTF-16 otherwise.
pub(crate) fn pick(string: &str) -> Encoding {
    if string.chars().all(|ch| u32::from(ch) <= 0xFF) {
        Encoding::Latin1
    } else {
        Encoding::Utf16
    }
}

/// Consumes the rest of the stream and decodes it.
pub(crate) fn read(encoding: Encoding, stream: &mut BufStream) -> String {
    decode(encoding, stream.take_rest())
}

/// Consumes the stream up to the next NUL terminator and decodes the data
/// before it. The terminator is consumed but not part of the result.
pub(crate) fn read_terminated(encoding: Encoding, stream: &mut BufStream) -> String {
    let data = match encoding.nul_size() {
        1 => stream.search(&[0]),
        _ => stream.search(&[0, 0]),
    };

    decode(encoding, data)
}

pub(crate) fn decode(encoding: Encoding, data: &[u8]) -> String {
    // Non-terminated string data is frequently NUL-terminated anyway. Drop
    // the stray terminator instead of carrying it into the string.
    let data = match encoding.nul_size() {
        1 => data.strip_suffix(&[0]).unwrap_or(data),
        _ => data.strip_suffix(&[0, 0]).unwrap_or(data),
    };

    match encoding {
        Encoding::Latin1 => data.iter().map(|&byte| char::from(byte)).collect(),
        Encoding::Utf16 => decode_utf16(data),
        Encoding::Utf16Be => decode_utf16_pairs(data, u16::from_be_bytes),
        Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Decodes `data` as ASCII, dropping any byte outside the ASCII range.
///
/// This is the fallback for text data with no recognizable encoding marker,
/// and the nominal encoding of ID3v1 fields.
pub(crate) fn decode_ascii(data: &[u8]) -> String {
    data.iter()
        .filter(|&&byte| byte < 0x80)
        .map(|&byte| char::from(byte))
        .collect()
}

fn decode_utf16(data: &[u8]) -> String {
    if data.len() < 2 {
        return String::new();
    }

    match (data[0], data[1]) {
        (0xFF, 0xFE) => decode_utf16_pairs(&data[2..], u16::from_le_bytes),
        (0xFE, 0xFF) => decode_utf16_pairs(&data[2..], u16::from_be_bytes),
        _ => {
            warn!("utf-16 data with no BOM, assuming little-endian");
            decode_utf16_pairs(data, u16::from_le_bytes)
        }
    }
}

fn decode_utf16_pairs(data: &[u8], mk: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| mk([pair[0], pair[1]]))
        .collect();

    String::from_utf16_lossy(&units)
}

/// Renders `string` in `encoding` with no terminator.
pub(crate) fn render(encoding: Encoding, string: &str) -> Vec<u8> {
    match encoding {
        Encoding::Latin1 => string
            .chars()
            .map(|ch| if u32::from(ch) > 0xFF { b'?' } else { ch as u8 })
            .collect(),
        Encoding::Utf16 => {
            let mut out = vec![0xFF, 0xFE];
            out.extend(string.encode_utf16().flat_map(|unit| unit.to_le_bytes()));
            out
        }
        Encoding::Utf16Be => string
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
        Encoding::Utf8 => string.as_bytes().to_vec(),
    }
}

/// Renders `string` in `encoding` plus a NUL terminator.
pub(crate) fn render_terminated(encoding: Encoding, string: &str) -> Vec<u8> {
    let mut out = render(encoding, string);
    out.resize(out.len() + encoding.nul_size(), 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STR_LATIN1: &str = "s\u{ED}mple l\u{E4}tin";
    const DATA_LATIN1: &[u8] = b"s\xEDmple l\xE4tin";

    const STR_UNICODE: &str = "sample \u{2764} text";
    const DATA_UTF16: &[u8] = b"\xFF\xFEs\x00a\x00m\x00p\x00l\x00e\x00 \x00\x64\x27 \x00t\x00e\x00x\x00t\x00";

    #[test]
    fn decode_latin1() {
        assert_eq!(decode(Encoding::Latin1, DATA_LATIN1), STR_LATIN1);
    }

    #[test]
    fn decode_utf16_bom() {
        assert_eq!(decode(Encoding::Utf16, DATA_UTF16), STR_UNICODE);
    }

    #[test]
    fn decode_drops_stray_terminator() {
        assert_eq!(decode(Encoding::Latin1, b"text\x00"), "text");
        assert_eq!(decode(Encoding::Utf8, b"text\x00"), "text");
    }

    #[test]
    fn decode_ascii_drops_high_bytes() {
        assert_eq!(decode_ascii(b"na\xEFme"), "name");
    }

    #[test]
    fn render_latin1_lossy() {
        assert_eq!(render(Encoding::Latin1, STR_LATIN1), DATA_LATIN1);
        assert_eq!(render(Encoding::Latin1, "a\u{2764}b"), b"a?b");
    }

    #[test]
    fn render_utf16_roundtrip() {
        assert_eq!(render(Encoding::Utf16, STR_UNICODE), DATA_UTF16);
    }

    #[test]
    fn render_terminator_widths() {
        assert_eq!(render_terminated(Encoding::Latin1, "ab"), b"ab\x00");
        assert_eq!(
            render_terminated(Encoding::Utf16Be, "ab"),
            b"\x00a\x00b\x00\x00"
        );
    }

    #[test]
    fn read_terminated_splits() {
        let mut stream = BufStream::new(b"one\x00two");
        assert_eq!(read_terminated(Encoding::Latin1, &mut stream), "one");
        assert_eq!(read_terminated(Encoding::Latin1, &mut stream), "two");
    }

    #[test]
    fn picks_minimal_encoding() {
        assert_eq!(pick("plain"), Encoding::Latin1);
        assert_eq!(pick(STR_LATIN1), Encoding::Latin1);
        assert_eq!(pick(STR_UNICODE), Encoding::Utf16);
    }
}

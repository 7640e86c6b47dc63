//! FLAC metadata-block framing.
//!
//! After the `fLaC` magic, metadata blocks carry a one-byte last-flag/type
//! header and a 3-byte big-endian size. Only the VorbisComment block (type
//! 4) is interpreted; everything else is stepped over.

use crate::core::io::{BufStream, Source};
use crate::err::{DecodeError, Result};
use crate::meta::Metadata;
use crate::vorbis;

const VORBIS_COMMENT: u8 = 0x04;

/// Decodes the metadata of a FLAC stream.
pub(crate) fn parse(src: &mut Source) -> Result<Metadata> {
    src.seek(0)?;

    if &src.read_array::<4>()? != b"fLaC" {
        return Err(DecodeError::NotFound.into());
    }

    let end = src.len()?;
    let mut meta = Metadata::new();
    let mut pos = 4u64;

    while pos < end {
        src.seek(pos)?;
        let head: [u8; 4] = src.read_array()?;

        let flags = head[0];
        let size = u32::from_be_bytes([0, head[1], head[2], head[3]]);
        pos += 4;

        if flags & 0x7F == VORBIS_COMMENT {
            let block = src.read_vec(size as usize)?;
            vorbis::parse_comments(&mut meta, &mut BufStream::new(&block))?;
        }

        if flags & 0x80 != 0 {
            break;
        }

        pos += u64::from(size);
    }

    meta.reset();
    Ok(meta)
}

//! OGG page framing.
//!
//! Pages carry a segment-lacing table; runs of 255-byte segments concatenate
//! into packets, and a packet can continue onto the next page. The packet
//! starting with `\x03vorbis` is the comment header. Decoding stops at the
//! end-of-stream page.

use crate::core::io::{BufStream, Source};
use crate::err::{DecodeError, Result};
use crate::meta::Metadata;
use crate::vorbis;
use log::warn;

const COMMENT_MAGIC: &[u8] = b"\x03vorbis";

/// End-of-stream page flag.
const FLAG_LAST: u8 = 0x04;

/// Decodes the metadata of an OGG stream.
pub(crate) fn parse(src: &mut Source) -> Result<Metadata> {
    let end = src.len()?;
    let mut meta = Metadata::new();

    let mut pos = 0u64;
    let mut packet: Vec<u8> = Vec::new();
    let mut pages = 0u64;

    while pos < end {
        src.seek(pos)?;
        let head: [u8; 27] = src.read_array()?;

        if &head[0..4] != b"OggS" || head[4] != 0 {
            return Err(DecodeError::NotFound.into());
        }

        let flags = head[5];
        let segments = usize::from(head[26]);

        let lacing = src.read_vec(segments)?;
        let body_len: usize = lacing.iter().map(|&seg| usize::from(seg)).sum();
        let body = src.read_vec(body_len)?;

        let mut at = 0;
        for &seg in &lacing {
            packet.extend(&body[at..at + usize::from(seg)]);
            at += usize::from(seg);

            // A short segment terminates the packet; a 255 segment at the
            // end of the page continues it on the next page.
            if seg < 255 {
                handle_packet(&mut meta, &packet);
                packet.clear();
            }
        }

        pos += 27 + segments as u64 + body_len as u64;
        pages += 1;

        if flags & FLAG_LAST != 0 {
            break;
        }
    }

    if pages == 0 {
        return Err(DecodeError::NotFound.into());
    }

    meta.reset();
    Ok(meta)
}

fn handle_packet(meta: &mut Metadata, packet: &[u8]) {
    if packet.len() < COMMENT_MAGIC.len() || &packet[..COMMENT_MAGIC.len()] != COMMENT_MAGIC {
        return;
    }

    let mut stream = BufStream::new(&packet[COMMENT_MAGIC.len()..]);
    if let Err(err) = vorbis::parse_comments(meta, &mut stream) {
        warn!("bad vorbis comment packet ({})", err);
    }
}

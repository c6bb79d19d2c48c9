//! Binary encoding of tracks for queue persistence
//!
//! # Format
//!
//! Every record starts with a header followed by a length-delimited body:
//!
//! ```text
//! u8   major version (FORMAT_VERSION)
//! u32  body length, big endian
//! body:
//!   str  identifier
//!   str  source_name
//!   str  title
//!   str  author
//!   u8   flags (bit 0: is_stream, 1: duration, 2: uri, 3: artwork)
//!   u64  duration_ms          (flag 1)
//!   str  uri                  (flag 2)
//!   str  artwork_url          (flag 3)
//!   blob provider state
//!   ...  fields added by later minor revisions, skipped by older readers
//! ```
//!
//! `str` and `blob` are a big endian `u32` length followed by the bytes.
//! Readers must reject an unknown major version but ignore whatever is left
//! in the body after the fields they know.

use crate::error::{Result, SourceError};
use crate::model::{Playlist, ProviderState, Track};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

/// Current major version of the track format
pub const FORMAT_VERSION: u8 = 1;

/// Header size: version byte + body length
const HEADER_LEN: usize = 1 + 4;

const FLAG_STREAM: u8 = 0b0001;
const FLAG_DURATION: u8 = 0b0010;
const FLAG_URI: u8 = 0b0100;
const FLAG_ARTWORK: u8 = 0b1000;

/// Outcome of decoding a persisted queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedQueue {
    /// Entries that decoded cleanly, in their original order
    pub tracks: Vec<Track>,
    /// Number of corrupt entries that were skipped
    pub dropped: usize,
}

/// Encode a track
pub fn encode(track: &Track) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_record(&mut out, track);
    out.to_vec()
}

/// Decode a track produced by [`encode`]
///
/// Bytes after the end of the record are rejected; use [`decode_queue`] for
/// concatenated records.
pub fn decode(bytes: &[u8]) -> Result<Track> {
    let mut buf = bytes;
    let (version, body) = split_record(&mut buf)?;
    if buf.has_remaining() {
        return Err(SourceError::CorruptData(format!(
            "{} unexpected byte(s) after track record",
            buf.remaining()
        )));
    }
    read_record(version, body)
}

/// Encode a track as standard base64 text
pub fn encode_base64(track: &Track) -> String {
    BASE64.encode(encode(track))
}

/// Decode a track from [`encode_base64`] output
pub fn decode_base64(text: &str) -> Result<Track> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| SourceError::CorruptData(format!("Invalid base64: {}", e)))?;
    decode(&bytes)
}

/// Encode a queue of tracks
pub fn encode_queue(tracks: &[Track]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u32(tracks.len() as u32);
    for track in tracks {
        write_record(&mut out, track);
    }
    out.to_vec()
}

/// Decode a queue, dropping corrupt entries instead of failing the whole queue
///
/// Only a damaged queue header (or a record header that runs past the end of
/// the data) stops decoding; what was read up to that point is kept.
pub fn decode_queue(bytes: &[u8]) -> Result<DecodedQueue> {
    let mut buf = bytes;
    if buf.remaining() < 4 {
        return Err(SourceError::CorruptData("Queue header truncated".to_string()));
    }
    let count = buf.get_u32() as usize;
    let mut queue = DecodedQueue::default();

    for index in 0..count {
        let (version, body) = match split_record(&mut buf) {
            Ok(record) => record,
            Err(e) => {
                let lost = count - index;
                warn!(index, lost, error = %e, "Queue framing broken, dropping remaining entries");
                queue.dropped += lost;
                break;
            }
        };

        match read_record(version, body) {
            Ok(track) => queue.tracks.push(track),
            Err(e) => {
                warn!(index, error = %e, "Dropping corrupt queue entry");
                queue.dropped += 1;
            }
        }
    }

    Ok(queue)
}

/// Encode a playlist: title, selected index, then its tracks as a queue
pub fn encode_playlist(playlist: &Playlist) -> Vec<u8> {
    let mut out = BytesMut::new();
    put_str(&mut out, &playlist.name);
    match playlist.selected {
        Some(index) => {
            out.put_u8(1);
            out.put_u32(index as u32);
        }
        None => out.put_u8(0),
    }
    out.extend_from_slice(&encode_queue(&playlist.tracks));
    out.to_vec()
}

/// Decode a playlist produced by [`encode_playlist`]
///
/// Corrupt tracks are dropped like in [`decode_queue`]; the selection is
/// cleared if it no longer points at the same entry.
pub fn decode_playlist(bytes: &[u8]) -> Result<Playlist> {
    let mut buf = bytes;
    let name = get_str(&mut buf, "playlist name")?;
    let selected = match get_u8(&mut buf, "selection flag")? {
        0 => None,
        1 => Some(get_u32(&mut buf, "selected index")? as usize),
        other => {
            return Err(SourceError::CorruptData(format!(
                "Invalid selection flag {}",
                other
            )));
        }
    };
    let queue = decode_queue(buf)?;
    let selected = if queue.dropped == 0 { selected } else { None };
    Ok(Playlist::new(name, queue.tracks, selected))
}

fn write_record(out: &mut BytesMut, track: &Track) {
    let mut body = BytesMut::new();
    put_str(&mut body, &track.identifier);
    put_str(&mut body, &track.source_name);
    put_str(&mut body, &track.title);
    put_str(&mut body, &track.author);

    let mut flags = 0u8;
    if track.is_stream {
        flags |= FLAG_STREAM;
    }
    if track.duration_ms.is_some() {
        flags |= FLAG_DURATION;
    }
    if track.uri.is_some() {
        flags |= FLAG_URI;
    }
    if track.artwork_url.is_some() {
        flags |= FLAG_ARTWORK;
    }
    body.put_u8(flags);

    if let Some(duration) = track.duration_ms {
        body.put_u64(duration);
    }
    if let Some(uri) = &track.uri {
        put_str(&mut body, uri);
    }
    if let Some(artwork) = &track.artwork_url {
        put_str(&mut body, artwork);
    }
    put_blob(&mut body, track.state.as_bytes());

    out.put_u8(FORMAT_VERSION);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
}

/// Consume one record header from `buf` and return the version tag and body
fn split_record<'a>(buf: &mut &'a [u8]) -> Result<(u8, &'a [u8])> {
    if buf.remaining() < HEADER_LEN {
        return Err(SourceError::CorruptData("Track header truncated".to_string()));
    }
    let version = buf.get_u8();
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(SourceError::CorruptData(format!(
            "Track body truncated: expected {} bytes, {} available",
            len,
            buf.remaining()
        )));
    }
    let data: &'a [u8] = *buf;
    let (body, rest) = data.split_at(len);
    *buf = rest;
    Ok((version, body))
}

fn read_record(version: u8, body: &[u8]) -> Result<Track> {
    if version != FORMAT_VERSION {
        return Err(SourceError::CorruptData(format!(
            "Unsupported track format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    read_body(body)
}

fn read_body(mut body: &[u8]) -> Result<Track> {
    let buf = &mut body;
    let identifier = get_str(buf, "identifier")?;
    let source_name = get_str(buf, "source name")?;
    let title = get_str(buf, "title")?;
    let author = get_str(buf, "author")?;
    let flags = get_u8(buf, "flags")?;

    let duration_ms = if flags & FLAG_DURATION != 0 {
        Some(get_u64(buf, "duration")?)
    } else {
        None
    };
    let uri = if flags & FLAG_URI != 0 {
        Some(get_str(buf, "uri")?)
    } else {
        None
    };
    let artwork_url = if flags & FLAG_ARTWORK != 0 {
        Some(get_str(buf, "artwork url")?)
    } else {
        None
    };
    let state = ProviderState::from_bytes(get_blob(buf, "provider state")?);

    // anything left belongs to a newer minor revision

    Ok(Track {
        identifier,
        title,
        author,
        duration_ms,
        is_stream: flags & FLAG_STREAM != 0,
        uri,
        artwork_url,
        source_name,
        state,
    })
}

fn put_str(out: &mut BytesMut, value: &str) {
    put_blob(out, value.as_bytes());
}

fn put_blob(out: &mut BytesMut, value: &[u8]) {
    out.put_u32(value.len() as u32);
    out.extend_from_slice(value);
}

fn truncated(field: &str) -> SourceError {
    SourceError::CorruptData(format!("Truncated field: {}", field))
}

fn get_u8(buf: &mut &[u8], field: &str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated(field));
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8], field: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(field));
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut &[u8], field: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(truncated(field));
    }
    Ok(buf.get_u64())
}

fn get_blob(buf: &mut &[u8], field: &str) -> Result<Vec<u8>> {
    let len = get_u32(buf, field)? as usize;
    if buf.remaining() < len {
        return Err(truncated(field));
    }
    let value = buf[..len].to_vec();
    buf.advance(len);
    Ok(value)
}

fn get_str(buf: &mut &[u8], field: &str) -> Result<String> {
    let bytes = get_blob(buf, field)?;
    String::from_utf8(bytes)
        .map_err(|_| SourceError::CorruptData(format!("Invalid UTF-8 in {}", field)))
}

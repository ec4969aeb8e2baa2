//! XSP object codec: the encrypted segmented-byte format every XSP
//! filesystem node's content is stored as. An XSP object is a fixed header
//! followed by independently-sealed, fixed-size segments, so a reader can
//! decrypt any byte range without touching segments outside it.
//!
//! Every object carries its own random nonce base (`n0`); segment `index`
//! is sealed under `n0 + index`, so two objects under the same key never
//! reuse a nonce. Re-encrypting a base object in place (a new version of
//! the same node) must move to a new effective nonce via
//! [`calculate_nonce`] rather than reusing `n0`.

mod cipher;
mod header;

pub use cipher::{
    add_to_nonce, calculate_nonce, open_with_random_nonce, random_n0, seal_with_random_nonce,
    ObjectKey, KEY_LEN, NONCE_LEN,
};
pub use header::{XspFormat, XspHeader, HEADER_LEN, TAG_LEN};

use trc::{AddContext, IntoErr};

/// What to encode into a fresh XSP object's plaintext stream.
pub enum Payload<'a> {
    /// Raw content, no attributes section.
    Plain(&'a [u8]),
    /// A length-prefixed attributes blob followed by content, the layout
    /// filesystem nodes that carry their own attrs (size, timestamps) use.
    WithAttrs { attrs: &'a [u8], content: &'a [u8] },
}

/// The decoded plaintext stream of an XSP object, split back into its attrs
/// section (if the object was encoded in the `WithAttrs` format) and
/// content.
pub struct DecodedObject {
    pub attrs: Option<Vec<u8>>,
    pub content: Vec<u8>,
}

fn flatten_payload(payload: Payload) -> (XspFormat, Vec<u8>) {
    match payload {
        Payload::Plain(bytes) => (XspFormat::Plain, bytes.to_vec()),
        Payload::WithAttrs { attrs, content } => {
            let mut buf = Vec::with_capacity(4 + attrs.len() + content.len());
            buf.extend_from_slice(&(attrs.len() as u32).to_le_bytes());
            buf.extend_from_slice(attrs);
            buf.extend_from_slice(content);
            (XspFormat::WithAttrs, buf)
        }
    }
}

/// Encodes `payload` into a complete XSP object under nonce base `n0`:
/// header followed by one sealed segment per `segment_size`-sized chunk of
/// the flattened plaintext stream (the last segment may be shorter).
pub fn encode_object(
    key: &ObjectKey,
    n0: [u8; NONCE_LEN],
    segment_size: u32,
    payload: Payload,
) -> trc::Result<Vec<u8>> {
    let (format, plaintext) = flatten_payload(payload);
    let header = XspHeader {
        format,
        n0,
        segment_size,
        total_size: plaintext.len() as u64,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN);
    out.extend_from_slice(&header.encode());

    for index in 0..header.segment_count() {
        let start = (index * segment_size as u64) as usize;
        let len = header.plaintext_len_of(index) as usize;
        let sealed = cipher::seal_segment(key, &n0, index, &plaintext[start..start + len])
            .caused_by(trc::location!())?;
        out.extend_from_slice(&sealed);
    }
    Ok(out)
}

/// Encodes plain content into a fresh object with a freshly generated
/// random nonce base, the common case for newly created nodes.
pub fn encode_fresh_object(key: &ObjectKey, segment_size: u32, plaintext: &[u8]) -> trc::Result<Vec<u8>> {
    encode_object(key, random_n0(), segment_size, Payload::Plain(plaintext))
}

/// Re-encrypts `plaintext` as a new version of a base object that was
/// originally sealed with nonce base `base_n0`: the header nonce moves to
/// `calculate_nonce(base_n0, new_version)` so the new version's segments
/// never reuse a nonce the previous version sealed under the same key.
pub fn encode_object_version(
    key: &ObjectKey,
    base_n0: [u8; NONCE_LEN],
    new_version: u32,
    segment_size: u32,
    payload: Payload,
) -> trc::Result<Vec<u8>> {
    encode_object(key, calculate_nonce(&base_n0, new_version), segment_size, payload)
}

/// Decodes a whole XSP object back into its attrs/content plaintext stream.
pub fn decode_object(key: &ObjectKey, bytes: &[u8]) -> trc::Result<DecodedObject> {
    let header = XspHeader::decode(bytes)?;
    let mut plain = Vec::with_capacity(header.total_size as usize);
    for index in 0..header.segment_count() {
        plain.extend_from_slice(&open_segment_at(key, &header, bytes, index)?);
    }
    match header.format {
        XspFormat::Plain => Ok(DecodedObject {
            attrs: None,
            content: plain,
        }),
        XspFormat::WithAttrs => {
            if plain.len() < 4 {
                return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                    .into_err()
                    .details("with-attrs object missing attrs length prefix"));
            }
            let attrs_len = u32::from_le_bytes(plain[0..4].try_into().unwrap()) as usize;
            if plain.len() < 4 + attrs_len {
                return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
                    .into_err()
                    .details("with-attrs object truncated before declared attrs end"));
            }
            Ok(DecodedObject {
                attrs: Some(plain[4..4 + attrs_len].to_vec()),
                content: plain[4 + attrs_len..].to_vec(),
            })
        }
    }
}

/// Decodes an object expected to be in the plain format, returning its
/// content directly. Errors if the object was encoded `WithAttrs`.
pub fn decode_plain_object(key: &ObjectKey, bytes: &[u8]) -> trc::Result<Vec<u8>> {
    let decoded = decode_object(key, bytes)?;
    if decoded.attrs.is_some() {
        return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
            .into_err()
            .details("expected a plain XSP object, found one with an attrs section"));
    }
    Ok(decoded.content)
}

/// Decrypts only the segments overlapping `[offset, offset + len)` and
/// returns exactly that byte range, the operation the object cache's
/// partial-download reads rely on. Only meaningful for `Plain` objects: an
/// attrs-bearing object's content starts at a byte offset the caller would
/// otherwise have to know in advance, so range reads always target the
/// plain stream.
pub fn read_range(key: &ObjectKey, bytes: &[u8], offset: u64, len: u64) -> trc::Result<Vec<u8>> {
    let header = XspHeader::decode(bytes)?;
    if offset > header.total_size {
        return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
            .into_err()
            .details("range start past end of object"));
    }
    let end = (offset + len).min(header.total_size);
    if end <= offset {
        return Ok(Vec::new());
    }

    let segment_size = header.segment_size as u64;
    let first_segment = offset / segment_size;
    let last_segment = (end - 1) / segment_size;

    let mut out = Vec::with_capacity((end - offset) as usize);
    for index in first_segment..=last_segment {
        let segment_start = index * segment_size;
        let plaintext = open_segment_at(key, &header, bytes, index)?;

        let slice_start = offset.saturating_sub(segment_start) as usize;
        let slice_end = (end.saturating_sub(segment_start)).min(plaintext.len() as u64) as usize;
        out.extend_from_slice(&plaintext[slice_start..slice_end]);
    }
    Ok(out)
}

fn open_segment_at(
    key: &ObjectKey,
    header: &XspHeader,
    bytes: &[u8],
    index: u64,
) -> trc::Result<Vec<u8>> {
    let plaintext_len = header.plaintext_len_of(index) as usize;
    let start = header.segment_offset(index);
    let end = start + plaintext_len + TAG_LEN;
    if end > bytes.len() {
        return Err(trc::EventType::File(trc::FileEvent::VersionMismatch)
            .into_err()
            .details("object truncated before declared segment end"));
    }
    cipher::open_segment(key, &header.n0, index, &bytes[start..end])
}

//! Magnet link info-hash extraction.

use crate::error::TransferError;

/// Extract the lowercase hex info-hash from a magnet link
///
/// Accepts the 40-character hex form and the 32-character base32 form of
/// `xt=urn:btih:`.
pub fn magnet_info_hash(locator: &str) -> Result<String, TransferError> {
    let malformed = |reason: &str| TransferError::MalformedMagnet {
        locator: locator.to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(locator).map_err(|e| malformed(&e.to_string()))?;
    if url.scheme() != "magnet" {
        return Err(malformed("not a magnet link"));
    }

    let topic = url
        .query_pairs()
        .filter(|(key, _)| key == "xt")
        .find_map(|(_, value)| {
            let value = value.into_owned();
            value
                .strip_prefix("urn:btih:")
                .or_else(|| value.strip_prefix("urn:BTIH:"))
                .map(str::to_string)
        })
        .ok_or_else(|| malformed("missing xt=urn:btih parameter"))?;

    match topic.len() {
        40 if topic.bytes().all(|b| b.is_ascii_hexdigit()) => Ok(topic.to_ascii_lowercase()),
        32 => decode_base32(&topic)
            .map(hex::encode)
            .ok_or_else(|| malformed("invalid base32 info-hash")),
        _ => Err(malformed("info-hash must be 40 hex or 32 base32 characters")),
    }
}

/// RFC 4648 base32 without padding
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for c in input.bytes() {
        let value = match c.to_ascii_uppercase() {
            c @ b'A'..=b'Z' => c - b'A',
            c @ b'2'..=b'7' => c - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(out)
}

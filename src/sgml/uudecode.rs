//! uuencoded payloads
//!
//! Older filings embed binary exhibits (PDFs, images, spreadsheets) as
//! uuencoded text inside `<TEXT>`:
//!
//! ```text
//! begin 644 exhibit.pdf
//! M)5!$1BTQ+C0*)>+CS],*...
//! `
//! end
//! ```

use super::errors::DecodeError;

/// Header line of a uuencoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuHeader {
    pub mode: String,
    pub name: String,
}

/// Parse a `begin <mode> <name>` line
pub fn parse_header(line: &[u8]) -> Option<UuHeader> {
    let line = String::from_utf8_lossy(line);
    let rest = line.trim().strip_prefix("begin ")?;
    let (mode, name) = rest.trim_start().split_once(char::is_whitespace)?;
    if mode.is_empty() || !mode.chars().all(|c| c.is_digit(8)) {
        return None;
    }
    Some(UuHeader {
        mode: mode.to_string(),
        name: name.trim().to_string(),
    })
}

/// Index of the first non-blank line, and that line, if it is a uuencode header
pub fn detect(content: &[u8]) -> Option<(usize, UuHeader)> {
    let mut offset = 0;
    for line in content.split_inclusive(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            offset += line.len();
            continue;
        }
        return parse_header(line).map(|header| (offset + line.len(), header));
    }
    None
}

/// Decode the body that follows a header line. Decoding stops at `end` or
/// at a zero-length line; lines shorter than declared are zero-filled, which
/// is how many legacy encoders trimmed trailing spaces.
pub fn decode_body(body: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(body.len() * 3 / 4);

    for (index, raw) in body.split(|b| *b == b'\n').enumerate() {
        let line = trim_line_end(raw);
        if line.is_empty() {
            continue;
        }
        if line == b"end" {
            return Ok(out);
        }

        let declared = decode_char(line[0]) as usize;
        if declared == 0 {
            // "`" or " " terminates the data section; `end` follows.
            continue;
        }

        let chars = &line[1..];
        let needed = (declared + 2) / 3 * 4;
        if chars.len() + 4 < needed {
            return Err(DecodeError::InvalidUuencode {
                line: index + 1,
                reason: format!("declared {} bytes but line is too short", declared),
            });
        }

        let mut produced = 0;
        let mut group = [0u8; 4];
        let mut pos = 0;
        while produced < declared {
            for slot in group.iter_mut() {
                *slot = chars.get(pos).map(|c| decode_char(*c)).unwrap_or(0);
                pos += 1;
            }
            let bytes = [
                (group[0] << 2) | (group[1] >> 4),
                (group[1] << 4) | (group[2] >> 2),
                (group[2] << 6) | group[3],
            ];
            let take = std::cmp::min(3, declared - produced);
            out.extend_from_slice(&bytes[..take]);
            produced += take;
        }
    }

    // Missing `end` trailer is common in truncated filings; keep what decoded.
    Ok(out)
}

/// Decode a complete uuencoded payload (header line included)
pub fn decode(content: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
    match detect(content) {
        Some((body_start, _)) => decode_body(&content[body_start..]).map(Some),
        None => Ok(None),
    }
}

fn decode_char(c: u8) -> u8 {
    c.wrapping_sub(b' ') & 0x3f
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\r' || line[end - 1] == b'\n') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
pub(crate) fn encode(name: &str, data: &[u8]) -> Vec<u8> {
    fn enc(v: u8) -> u8 {
        if v == 0 {
            b'`'
        } else {
            v + b' '
        }
    }

    let mut out = format!("begin 644 {}\n", name).into_bytes();
    for chunk in data.chunks(45) {
        out.push(enc(chunk.len() as u8));
        for triple in chunk.chunks(3) {
            let b = [
                triple[0],
                *triple.get(1).unwrap_or(&0),
                *triple.get(2).unwrap_or(&0),
            ];
            out.push(enc(b[0] >> 2));
            out.push(enc(((b[0] & 0x03) << 4) | (b[1] >> 4)));
            out.push(enc(((b[1] & 0x0f) << 2) | (b[2] >> 6)));
            out.push(enc(b[2] & 0x3f));
        }
        out.push(b'\n');
    }
    out.extend_from_slice(b"`\nend\n");
    out
}

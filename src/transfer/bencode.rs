//! Just enough bencode to find a torrent's `info` dictionary.

const MAX_DEPTH: usize = 64;

/// Byte span of the top-level `info` value of a `.torrent` document
///
/// The info-hash is the SHA-1 of exactly these bytes, so the span is taken
/// from the input rather than re-encoded.
pub fn info_span(data: &[u8]) -> Result<&[u8], String> {
    let mut cursor = Cursor { data, pos: 0 };

    if cursor.peek()? != b'd' {
        return Err("torrent is not a bencoded dictionary".to_string());
    }
    cursor.pos += 1;

    while cursor.peek()? != b'e' {
        let key = cursor.read_bytes()?;
        let start = cursor.pos;
        cursor.skip_value(0)?;
        if key == b"info" {
            let span = &data[start..cursor.pos];
            if span.first() != Some(&b'd') {
                return Err("info is not a dictionary".to_string());
            }
            return Ok(span);
        }
    }

    Err("torrent has no info dictionary".to_string())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Result<u8, String> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| "unexpected end of torrent data".to_string())
    }

    fn read_bytes(&mut self) -> Result<&'a [u8], String> {
        let colon = self.data[self.pos..]
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| "unterminated string length".to_string())?;
        let digits = &self.data[self.pos..self.pos + colon];
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(format!("invalid string length at offset {}", self.pos));
        }
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format!("invalid string length at offset {}", self.pos))?;

        let start = self.pos + colon + 1;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| "string runs past end of torrent data".to_string())?;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    fn skip_value(&mut self, depth: usize) -> Result<(), String> {
        if depth > MAX_DEPTH {
            return Err("torrent nesting too deep".to_string());
        }

        match self.peek()? {
            b'i' => {
                let end = self.data[self.pos..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| "unterminated integer".to_string())?;
                self.pos += end + 1;
            }
            b'l' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.skip_value(depth + 1)?;
                }
                self.pos += 1;
            }
            b'd' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.read_bytes()?;
                    self.skip_value(depth + 1)?;
                }
                self.pos += 1;
            }
            b'0'..=b'9' => {
                self.read_bytes()?;
            }
            other => {
                return Err(format!(
                    "unexpected byte 0x{:02x} at offset {}",
                    other, self.pos
                ));
            }
        }
        Ok(())
    }
}

//! Opaque listing cursor: base64 of `"<timestampMillis>:<id>"`

use base64::{engine::general_purpose::STANDARD, Engine as _};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: i64,
    pub id: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding,
    #[error("cursor is not '<timestamp>:<id>'")]
    Format,
}

impl Cursor {
    pub fn new(timestamp: i64, id: impl Into<String>) -> Self {
        Self {
            timestamp,
            id: id.into(),
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.timestamp, self.id))
    }

    /// Query strings turn `+` into spaces; both spellings decode.
    pub fn decode(raw: &str) -> Result<Self, CursorError> {
        let normalized = raw.trim().replace(' ', "+");
        let bytes = STANDARD.decode(normalized).map_err(|_| CursorError::Encoding)?;
        let text = String::from_utf8(bytes).map_err(|_| CursorError::Encoding)?;

        let (timestamp, id) = text.split_once(':').ok_or(CursorError::Format)?;
        let timestamp = timestamp.parse().map_err(|_| CursorError::Format)?;
        if id.is_empty() {
            return Err(CursorError::Format);
        }

        Ok(Self::new(timestamp, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_format() {
        let cursor = Cursor::new(1_700_000_000_000, "3f2b9a1c-0000-4000-8000-000000000001");
        let encoded = cursor.encode();
        assert_eq!(
            String::from_utf8(STANDARD.decode(&encoded).unwrap()).unwrap(),
            "1700000000000:3f2b9a1c-0000-4000-8000-000000000001"
        );
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_plus_decoded_as_space() {
        // "1700000000000:>>>?" encodes with a '+' in it
        let cursor = Cursor::new(1_700_000_000_000, ">>>?");
        let encoded = cursor.encode();
        assert!(encoded.contains('+'));
        assert_eq!(Cursor::decode(&encoded.replace('+', " ")).unwrap(), cursor);
    }

    #[test]
    fn test_malformed_cursors() {
        assert_eq!(Cursor::decode("%%%"), Err(CursorError::Encoding));
        assert_eq!(Cursor::decode(&STANDARD.encode("no-colon")), Err(CursorError::Format));
        assert_eq!(Cursor::decode(&STANDARD.encode("abc:id")), Err(CursorError::Format));
        assert_eq!(Cursor::decode(&STANDARD.encode("123:")), Err(CursorError::Format));
    }
}

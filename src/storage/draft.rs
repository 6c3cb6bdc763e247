use anyhow::{Context, Result};
use wincode::{SchemaRead, SchemaWrite};

/// Unsent message text of one peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, SchemaRead, SchemaWrite)]
pub struct Draft {
    pub text: String,
    /// Message being replied to, `0` for none.
    pub reply_to: u64,
    /// Cursor position in characters.
    pub cursor: u32,
}

impl Draft {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let cursor = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        Self { text, reply_to: 0, cursor }
    }

    #[must_use]
    pub const fn with_reply_to(mut self, message: u64) -> Self {
        self.reply_to = message;
        self
    }

    /// An empty draft clears the stored record instead of being written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.reply_to == 0
    }
}

#[derive(SchemaRead, SchemaWrite)]
struct DraftRecord {
    peer: u64,
    draft: Draft,
}

pub fn encode(peer: u64, draft: &Draft) -> Result<Vec<u8>> {
    wincode::serialize(&DraftRecord { peer, draft: draft.clone() }).context("failed to serialize draft")
}

/// Decodes a draft record; `None` when it belongs to another peer or is malformed.
pub fn decode(peer: u64, bytes: &[u8]) -> Option<Draft> {
    let record: DraftRecord = wincode::deserialize(bytes).ok()?;
    (record.peer == peer).then_some(record.draft)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_checks_peer() {
        let draft = Draft::new("see you at 5").with_reply_to(77);
        let bytes = encode(10, &draft).unwrap();

        assert_eq!(decode(10, &bytes), Some(draft));
        assert_eq!(decode(11, &bytes), None);
        assert_eq!(decode(10, b"junk"), None);
    }

    #[test]
    fn test_empty() {
        assert!(Draft::default().is_empty());
        assert!(!Draft::new("x").is_empty());
        assert!(!Draft::default().with_reply_to(1).is_empty());
        assert_eq!(Draft::new("héllo").cursor, 5);
    }
}

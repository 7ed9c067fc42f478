//! Inline person references embedded in note content.
//!
//! A reference has the form `{{person:<external-id>|<display-name>}}`. The
//! scan is byte-oriented and case-sensitive; tokens never nest. Fragments
//! whose id is not a dashed 36-character identifier stay literal text.

use std::collections::HashSet;
use std::ops::Range;

use uuid::Uuid;

const TOKEN_OPEN: &[u8] = b"{{person:";
const ID_SEPARATOR: u8 = b'|';
const TOKEN_CLOSE: &[u8] = b"}}";
const EXTERNAL_ID_LEN: usize = 36;
const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken<'a> {
    pub person_id: Uuid,
    pub display_name: &'a str,
    /// Byte range of the whole token, braces included.
    pub span: Range<usize>,
}

pub fn parse_mention_tokens(content: &str) -> Vec<MentionToken<'_>> {
    let bytes = content.as_bytes();
    let mut tokens = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = find(&bytes[cursor..], TOKEN_OPEN) {
        let start = cursor + offset;
        let id_start = start + TOKEN_OPEN.len();

        let Some(separator) = bytes[id_start..]
            .iter()
            .position(|byte| *byte == ID_SEPARATOR)
            .map(|pos| id_start + pos)
        else {
            break;
        };
        let name_start = separator + 1;
        let Some(close) = find(&bytes[name_start..], TOKEN_CLOSE).map(|pos| name_start + pos)
        else {
            break;
        };

        // Delimiters are ASCII, so every index here is a char boundary.
        match parse_external_id(&content[id_start..separator]) {
            Some(person_id) => {
                let end = close + TOKEN_CLOSE.len();
                tokens.push(MentionToken {
                    person_id,
                    display_name: &content[name_start..close],
                    span: start..end,
                });
                cursor = end;
            }
            None => cursor = id_start,
        }
    }

    tokens
}

/// Distinct mentioned ids in order of first appearance.
pub fn mentioned_person_ids(content: &str) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    parse_mention_tokens(content)
        .into_iter()
        .map(|token| token.person_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Accepts only the dashed 36-character hexadecimal form.
pub fn parse_external_id(raw: &str) -> Option<Uuid> {
    let bytes = raw.as_bytes();
    if bytes.len() != EXTERNAL_ID_LEN {
        return None;
    }

    let well_formed = bytes.iter().enumerate().all(|(index, byte)| {
        if DASH_POSITIONS.contains(&index) {
            *byte == b'-'
        } else {
            byte.is_ascii_hexdigit()
        }
    });
    if !well_formed {
        return None;
    }

    Uuid::parse_str(raw).ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

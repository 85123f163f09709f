//! Mention markup embedded in post and comment text.
//!
//! Current markup is `@(Name:userId)`. The older `@[Name](userId)` form is
//! still recognised when reading but never written.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::MentionRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionFormat {
    Current,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken {
    pub display_name: String,
    pub user_id: String,
    pub start: usize,
    pub end: usize,
    pub format: MentionFormat,
}

/// `@(Name:userId)` at byte offset `at`.
fn match_current(text: &str, at: usize) -> Option<MentionToken> {
    let rest = text.get(at..)?;
    let body = rest.strip_prefix("@(")?;
    let colon = body.find(':')?;
    if colon == 0 {
        return None;
    }
    let after_colon = &body[colon + 1..];
    let close = after_colon.find(')')?;
    if close == 0 {
        return None;
    }
    Some(MentionToken {
        display_name: body[..colon].to_string(),
        user_id: after_colon[..close].to_string(),
        start: at,
        end: at + 2 + colon + 1 + close + 1,
        format: MentionFormat::Current,
    })
}

/// `@[Name](userId)` at byte offset `at`.
fn match_legacy(text: &str, at: usize) -> Option<MentionToken> {
    let rest = text.get(at..)?;
    let body = rest.strip_prefix("@[")?;
    let close_bracket = body.find(']')?;
    if close_bracket == 0 {
        return None;
    }
    let after = body[close_bracket + 1..].strip_prefix('(')?;
    let close = after.find(')')?;
    if close == 0 {
        return None;
    }
    Some(MentionToken {
        display_name: body[..close_bracket].to_string(),
        user_id: after[..close].to_string(),
        start: at,
        end: at + 2 + close_bracket + 2 + close + 1,
        format: MentionFormat::Legacy,
    })
}

fn scan(text: &str, matcher: fn(&str, usize) -> Option<MentionToken>) -> Vec<MentionToken> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while let Some(offset) = text.get(i..).and_then(|rest| rest.find('@')) {
        let at = i + offset;
        match matcher(text, at) {
            Some(token) => {
                i = token.end;
                out.push(token);
            }
            None => i = at + 1,
        }
    }
    out
}

/// All mention tokens, current-format matches first, then legacy ones.
pub fn extract_mentions(text: &str) -> Vec<MentionToken> {
    let mut tokens = scan(text, match_current);
    tokens.extend(scan(text, match_legacy));
    tokens
}

pub fn is_user_mentioned(text: &str, user_id: &str) -> bool {
    extract_mentions(text)
        .iter()
        .any(|token| token.user_id == user_id)
}

/// Mentions whose id is a valid user id, first occurrence per user.
pub fn mention_refs(text: &str) -> Vec<MentionRef> {
    let mut seen = HashSet::new();
    extract_mentions(text)
        .into_iter()
        .filter_map(|token| {
            let user_id = Uuid::parse_str(token.user_id.trim()).ok()?;
            seen.insert(user_id).then(|| MentionRef {
                user_id,
                display_name: token.display_name,
            })
        })
        .collect()
}

/// Rewrites each literal `@Name` of a selected user into `@(Name:userId)`.
/// Longer names go first so `@Bobby` is not split by a selected `@Bob`.
pub fn to_storage_format(display_text: &str, selected: &[MentionRef]) -> String {
    let mut ordered: Vec<&MentionRef> = selected
        .iter()
        .filter(|m| !m.display_name.trim().is_empty())
        .collect();
    ordered.sort_by(|a, b| b.display_name.len().cmp(&a.display_name.len()));

    let mut text = display_text.to_string();
    for mention in ordered {
        let display = format!("@{}", mention.display_name);
        let stored = format!("@({}:{})", mention.display_name, mention.user_id);
        text = text.replace(&display, &stored);
    }
    text
}

/// Replaces every mention token with `@Name`.
pub fn to_plain_text(text: &str) -> String {
    let mut tokens = extract_mentions(text);
    tokens.sort_by_key(|token| token.start);

    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for token in tokens {
        if token.start < last {
            continue;
        }
        out.push_str(&text[last..token.start]);
        out.push('@');
        out.push_str(&token.display_name);
        last = token.end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_formats() {
        let text = "hi @(Bob:u1) and @[Carol](u2)!";
        let tokens = extract_mentions(text);

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].display_name, "Bob");
        assert_eq!(tokens[0].user_id, "u1");
        assert_eq!(tokens[0].format, MentionFormat::Current);
        assert_eq!(&text[tokens[0].start..tokens[0].end], "@(Bob:u1)");
        assert_eq!(tokens[1].display_name, "Carol");
        assert_eq!(tokens[1].format, MentionFormat::Legacy);
        assert_eq!(&text[tokens[1].start..tokens[1].end], "@[Carol](u2)");
    }

    #[test]
    fn ignores_incomplete_markup() {
        assert!(extract_mentions("email me @ home, @(NoId:) or @[]()").is_empty());
        assert!(extract_mentions("@(Unclosed:abc").is_empty());
    }

    #[test]
    fn detects_mentioned_user() {
        let text = "thanks @(Ann Lee:abc-123)";
        assert!(is_user_mentioned(text, "abc-123"));
        assert!(!is_user_mentioned(text, "abc"));
    }

    #[test]
    fn storage_format_handles_overlapping_names() {
        let bob = MentionRef {
            user_id: Uuid::new_v4(),
            display_name: "Bob".to_string(),
        };
        let bobby = MentionRef {
            user_id: Uuid::new_v4(),
            display_name: "Bobby".to_string(),
        };
        let stored = to_storage_format("@Bob meet @Bobby", &[bob.clone(), bobby.clone()]);

        assert_eq!(
            stored,
            format!("@(Bob:{}) meet @(Bobby:{})", bob.user_id, bobby.user_id)
        );
        assert_eq!(mention_refs(&stored), vec![bob, bobby]);
        assert_eq!(to_plain_text(&stored), "@Bob meet @Bobby");
    }

    #[test]
    fn mention_refs_skip_non_uuid_ids_and_duplicates() {
        let id = Uuid::new_v4();
        let text = format!("@(A:{id}) @(A:{id}) @[B](legacy-id)");
        let refs = mention_refs(&text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].user_id, id);
    }

    #[test]
    fn plain_text_keeps_non_ascii_content() {
        assert_eq!(to_plain_text("héllo @(Zoë:z) ✨"), "héllo @Zoë ✨");
    }
}

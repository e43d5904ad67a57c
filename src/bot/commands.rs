// src/bot/commands.rs - Keyword-anchored moderation command parsing

use log::debug;

use crate::config::CommandKeywords;
use crate::types::{CommandKind, ParsedCommand, Target};

/// Recognizes the stop / stop-all / list / top command surface in free text.
///
/// Matching is case-insensitive and anchored on configured keyword phrases,
/// found anywhere in the message to tolerate incidental prefixes. A space in
/// a phrase matches any whitespace run.
pub struct CommandInterpreter {
    keywords: CommandKeywords,
}

impl CommandInterpreter {
    pub fn new(keywords: CommandKeywords) -> Self {
        Self { keywords }
    }

    pub fn parse(&self, text: &str) -> ParsedCommand {
        if let Some((_, end)) = find_phrase(text, &self.keywords.stop_phrase) {
            // "stop" + the all-qualifier on the same line means stop-all.
            if let Some(qualifier_end) =
                qualifier_after(text, end, &self.keywords.all_qualifier)
            {
                debug!("Parsed stop-all command");
                return ParsedCommand {
                    kind: CommandKind::StopAll,
                    payload: raw_payload(text, qualifier_end),
                };
            }
            debug!("Parsed stop command");
            return ParsedCommand {
                kind: CommandKind::Stop,
                payload: raw_payload(text, end),
            };
        }
        if let Some((_, end)) = find_phrase(text, &self.keywords.list_phrase) {
            let kind = if qualifier_after(text, end, &self.keywords.mine_qualifier).is_some() {
                CommandKind::ListMine
            } else {
                CommandKind::List
            };
            return ParsedCommand {
                kind,
                payload: None,
            };
        }
        if find_phrase(text, &self.keywords.top_phrase).is_some() {
            return ParsedCommand {
                kind: CommandKind::Top,
                payload: None,
            };
        }
        ParsedCommand::none()
    }

    /// Turn a raw payload into notice text: strip the targets' `@username`s
    /// so the notice does not echo the command's own mention, strip leading
    /// dash/colon punctuation, collapse whitespace runs. Empty means none.
    pub fn sanitize_payload(raw: &str, targets: &[Target]) -> Option<String> {
        let mut cleaned = raw.to_string();
        for target in targets {
            if let Some(username) = &target.username {
                cleaned = strip_mention(&cleaned, username);
            }
        }
        let cleaned = cleaned.trim_start();
        let cleaned = cleaned.trim_start_matches(['-', ':']);
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }
}

/// Drop the remainder of the keyword's own line; the following lines are the
/// raw payload.
fn raw_payload(text: &str, from: usize) -> Option<String> {
    let after = &text[from..];
    let rest = after.split_once('\n')?.1;
    if rest.trim().is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Case-insensitive phrase search returning byte offsets into `text`.
///
/// A space inside the phrase matches one or more whitespace characters. The
/// match must sit on word boundaries so that a phrase does not fire inside a
/// longer word.
fn find_phrase(text: &str, phrase: &str) -> Option<(usize, usize)> {
    let phrase: Vec<char> = phrase.trim().to_lowercase().chars().collect();
    if phrase.is_empty() {
        return None;
    }
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    'candidates: for start in 0..chars.len() {
        if start > 0 && is_word_char(chars[start - 1].1) {
            continue;
        }
        let mut ti = start;
        let mut pi = 0;
        while pi < phrase.len() {
            if phrase[pi].is_whitespace() {
                if ti >= chars.len() || !chars[ti].1.is_whitespace() {
                    continue 'candidates;
                }
                while ti < chars.len() && chars[ti].1.is_whitespace() {
                    ti += 1;
                }
                while pi < phrase.len() && phrase[pi].is_whitespace() {
                    pi += 1;
                }
            } else {
                if ti >= chars.len() || !chars_eq_ci(chars[ti].1, phrase[pi]) {
                    continue 'candidates;
                }
                ti += 1;
                pi += 1;
            }
        }
        if ti < chars.len() && is_word_char(chars[ti].1) {
            continue;
        }
        let end = chars.get(ti).map(|&(i, _)| i).unwrap_or(text.len());
        return Some((chars[start].0, end));
    }
    None
}

/// If the next word after `from` (same line) equals `qualifier`, return the
/// byte offset just past it.
fn qualifier_after(text: &str, from: usize, qualifier: &str) -> Option<usize> {
    let qualifier: Vec<char> = qualifier.trim().to_lowercase().chars().collect();
    if qualifier.is_empty() {
        return None;
    }
    let mut iter = text[from..].char_indices().peekable();
    // Skip horizontal whitespace only: a line break puts the rest in the payload.
    while let Some(&(_, c)) = iter.peek() {
        if c.is_whitespace() && c != '\n' {
            iter.next();
        } else {
            break;
        }
    }
    let mut qi = 0;
    let mut end = None;
    for (i, c) in iter {
        if qi == qualifier.len() {
            end = Some(from + i);
            break;
        }
        if !chars_eq_ci(c, qualifier[qi]) {
            return None;
        }
        qi += 1;
    }
    if qi < qualifier.len() {
        return None;
    }
    match end {
        // Qualifier ran to the end of the text.
        None => Some(text.len()),
        Some(end) => {
            let next = text[end..].chars().next();
            if next.map(is_word_char).unwrap_or(false) {
                None
            } else {
                Some(end)
            }
        }
    }
}

fn chars_eq_ci(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Remove `@username` occurrences, case-insensitively.
fn strip_mention(text: &str, username: &str) -> String {
    let needle = format!("@{}", username.to_lowercase());
    let lower = text.to_lowercase();
    // The lowercase copy is only used to locate matches; slices are taken
    // from the original. Cyrillic and ASCII case pairs are length-stable.
    if lower.len() != text.len() {
        return text.replace(&format!("@{}", username), "");
    }
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find(&needle) {
        let at = cursor + found;
        let after = at + needle.len();
        if !text.is_char_boundary(at) || !text.is_char_boundary(after) {
            // Case folding shifted byte offsets; leave the rest untouched.
            break;
        }
        result.push_str(&text[cursor..at]);
        cursor = after;
    }
    result.push_str(&text[cursor..]);
    result
}

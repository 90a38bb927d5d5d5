//! Small stand-alone helpers shared across the crate: id generation, path
//! resolution, and text chunking.

use std::path::PathBuf;

/// Generate a random, sortable-enough identifier prefixed with `kind`.
///
/// Not a UUID: callers that need global uniqueness guarantees (store
/// primary keys) use [`uuid::Uuid::new_v4`] directly instead.
#[must_use]
pub fn generate_id(kind: &str) -> String {
    format!("{kind}_{}", uuid::Uuid::new_v4().simple())
}

/// Generate an id for an inbound/outbound message.
#[must_use]
pub fn generate_message_id() -> String {
    generate_id("msg")
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current Unix time in seconds, the unit the store persists timestamps in.
#[must_use]
pub fn timestamp_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The user's home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Root directory for overseer's own state: `~/.overseer`.
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(".overseer")
}

/// Path to the TOML configuration file.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Path to the SQLite database file.
#[must_use]
pub fn database_path() -> PathBuf {
    config_dir().join("overseer.db")
}

/// Root directory a given workspace slug's files live under.
#[must_use]
pub fn workspace_dir(slug: &str) -> PathBuf {
    config_dir().join("workspaces").join(slug)
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, appending an
/// ellipsis marker if truncated.
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}... [truncated]")
}

/// Count Unicode scalar values (the "runes" the size gate is specified
/// against) rather than bytes, so multi-byte UTF-8 does not undercount the
/// input size.
#[must_use]
pub fn count_runes(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `max_len` bytes, preferring to break
/// on newlines.
#[must_use]
pub fn split_into_chunks(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if current.len() + line.len() + 1 > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if line.len() > max_len {
                for chunk in line.as_bytes().chunks(max_len) {
                    chunks.push(String::from_utf8_lossy(chunk).into_owned());
                }
                continue;
            }
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn truncate_long_string_marks_truncation() {
        let out = truncate_str("hello world", 5);
        assert!(out.starts_with("hello"));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn count_runes_counts_scalars_not_bytes() {
        assert_eq!(count_runes("héllo"), 5);
        assert!("héllo".len() > 5);
    }

    #[test]
    fn split_into_chunks_respects_limit() {
        let text = "line one\nline two\nline three";
        let chunks = split_into_chunks(text, 10);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 10 || !chunk.contains('\n'));
        }
    }

    #[test]
    fn generate_id_has_requested_prefix() {
        let id = generate_id("task");
        assert!(id.starts_with("task_"));
    }
}

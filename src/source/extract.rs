//! Payload inspection for the two upstream formats.
//!
//! Extraction is strictly format-guided: a payload that fails its side's
//! validity check contributes nothing, even when an id-like substring is
//! present somewhere in the body.

/// The sequence sentinel shared by both upstreams.
const SEQUENCE_END: &str = "nothing else at the moment";

/// Fragment selecting valid source-A records.
const A_STATUS_OK: &str = "\"status\": \"ok\"";

/// Prefix of the identity field in a source-A payload.
const A_ID_PREFIX: &str = "\"id\": \"";

/// Prefix of an identity attribute in a source-B payload.
const B_VALUE_PREFIX: &str = "value=\"";

/// Marker closing one source-B polling round.
const B_ROUND_END: &str = "<done/>";

/// Result of inspecting one raw upstream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Identities carried by the payload. May be empty for a valid round
    /// that happened to carry no records.
    Records(Vec<String>),
    /// The payload failed its side's validity check and is dropped.
    Malformed,
    /// The upstream signalled that this sequence is finished.
    EndOfStream,
}

/// Inspects a source-A payload: a record is valid when it carries the
/// `"status": "ok"` fragment, and its identity is the value of the first
/// `"id": "…"` field.
pub fn extract_a(body: &str) -> Extraction {
    if body.contains(SEQUENCE_END) {
        return Extraction::EndOfStream;
    }
    if !body.contains(A_STATUS_OK) {
        return Extraction::Malformed;
    }
    match first_quoted(body, A_ID_PREFIX) {
        Some(id) if !id.is_empty() => Extraction::Records(vec![id.to_owned()]),
        _ => Extraction::Malformed,
    }
}

/// Inspects a source-B payload: identities are the values of `value="…"`
/// attributes, and a `<done/>` marker closes the round without carrying an
/// identity of its own.
pub fn extract_b(body: &str) -> Extraction {
    if body.contains(SEQUENCE_END) {
        return Extraction::EndOfStream;
    }

    let ids: Vec<String> = quoted_values(body, B_VALUE_PREFIX)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect();

    if ids.is_empty() && !body.contains(B_ROUND_END) {
        return Extraction::Malformed;
    }
    Extraction::Records(ids)
}

/// Returns the text between `prefix` and the next `"` after it.
fn first_quoted<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    let start = body.find(prefix)? + prefix.len();
    let rest = &body[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Iterates every `prefix…"` capture in the body, left to right.
fn quoted_values<'a>(body: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> {
    let mut rest = body;
    std::iter::from_fn(move || {
        let start = rest.find(prefix)? + prefix.len();
        let tail = &rest[start..];
        let end = tail.find('"')?;
        let value = &tail[..end];
        rest = &tail[end + 1..];
        Some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_valid_record() {
        let body = r#"{ "status": "ok", "id": "abc-123" }"#;
        assert_eq!(
            extract_a(body),
            Extraction::Records(vec!["abc-123".to_string()])
        );
    }

    #[test]
    fn test_a_takes_first_id_only() {
        let body = r#"{ "status": "ok", "id": "first", "id": "second" }"#;
        assert_eq!(
            extract_a(body),
            Extraction::Records(vec!["first".to_string()])
        );
    }

    #[test]
    fn test_a_without_ok_status_is_malformed_even_with_id() {
        let body = r#"{ "status": "error", "id": "abc-123" }"#;
        assert_eq!(extract_a(body), Extraction::Malformed);
    }

    #[test]
    fn test_a_ok_without_id_is_malformed() {
        assert_eq!(extract_a(r#"{ "status": "ok" }"#), Extraction::Malformed);
    }

    #[test]
    fn test_a_empty_id_is_malformed() {
        let body = r#"{ "status": "ok", "id": "" }"#;
        assert_eq!(extract_a(body), Extraction::Malformed);
    }

    #[test]
    fn test_a_end_sentinel() {
        assert_eq!(
            extract_a("nothing else at the moment"),
            Extraction::EndOfStream
        );
    }

    #[test]
    fn test_b_multiple_values() {
        let body = r#"<batch><rec value="x1"/><rec value="x2"/><done/></batch>"#;
        assert_eq!(
            extract_b(body),
            Extraction::Records(vec!["x1".to_string(), "x2".to_string()])
        );
    }

    #[test]
    fn test_b_done_only_round_is_empty_not_malformed() {
        assert_eq!(extract_b("<batch><done/></batch>"), Extraction::Records(vec![]));
    }

    #[test]
    fn test_b_no_values_no_done_is_malformed() {
        assert_eq!(extract_b("<batch></batch>"), Extraction::Malformed);
    }

    #[test]
    fn test_b_skips_empty_values() {
        let body = r#"<rec value=""/><rec value="x"/><done/>"#;
        assert_eq!(extract_b(body), Extraction::Records(vec!["x".to_string()]));
    }

    #[test]
    fn test_b_end_sentinel() {
        assert_eq!(
            extract_b("nothing else at the moment"),
            Extraction::EndOfStream
        );
    }

    #[test]
    fn test_b_unterminated_value_is_malformed() {
        assert_eq!(extract_b(r#"<rec value="x"#), Extraction::Malformed);
    }
}

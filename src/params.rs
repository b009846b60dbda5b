//! Ingestion request resolution: query string and content type to
//! [`IngestParams`].

use time::OffsetDateTime;

use crate::{Format, StackpileResult, normalize_labels, parse_time};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestParams {
    pub grouped: bool,
    pub format: Format,
    pub label_key: String,
    pub from: OffsetDateTime,
    pub until: OffsetDateTime,
}

impl IngestParams {
    /// Resolves parameters against an explicit clock reading. Absent or
    /// empty `from`/`until` become `now`; the range is not validated here.
    pub fn resolve(
        query: Option<&str>,
        content_type: Option<&str>,
        now: OffsetDateTime,
    ) -> StackpileResult<Self> {
        let pairs = query_pairs(query.unwrap_or_default());
        let grouped = pairs.iter().any(|(k, _)| k == "grouped");
        let from = resolve_time(&pairs, "from", now)?;
        let until = resolve_time(&pairs, "until", now)?;
        let label_key = normalize_labels(&pairs)?;
        Ok(Self {
            grouped,
            format: Format::select(content_type, grouped),
            label_key,
            from,
            until,
        })
    }

    pub fn resolve_now(query: Option<&str>, content_type: Option<&str>) -> StackpileResult<Self> {
        Self::resolve(query, content_type, OffsetDateTime::now_utc())
    }
}

/// Decodes an `application/x-www-form-urlencoded` query string.
pub fn query_pairs(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn resolve_time(
    pairs: &[(String, String)],
    name: &str,
    now: OffsetDateTime,
) -> StackpileResult<OffsetDateTime> {
    match pairs.iter().find(|(k, _)| k == name) {
        Some((_, v)) if !v.trim().is_empty() => Ok(parse_time(v, now)?),
        _ => Ok(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LabelError, StackpileError, TRIE_CONTENT_TYPE, TimeExprError};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    #[test]
    fn defaults_to_now_and_lines() {
        let p = IngestParams::resolve(Some("name=app.cpu"), None, NOW).expect("resolve");
        assert!(!p.grouped);
        assert_eq!(p.format, Format::Lines);
        assert_eq!(p.from, NOW);
        assert_eq!(p.until, NOW);
        assert_eq!(p.label_key, "app.cpu");
    }

    #[test]
    fn empty_time_params_mean_now() {
        let p = IngestParams::resolve(Some("name=app&from=&until="), None, NOW).expect("resolve");
        assert_eq!((p.from, p.until), (NOW, NOW));
    }

    #[test]
    fn grouped_is_presence_only() {
        for query in ["name=app&grouped", "name=app&grouped=", "name=app&grouped=false"] {
            let p = IngestParams::resolve(Some(query), None, NOW).expect("resolve");
            assert!(p.grouped, "{query}");
            assert_eq!(p.format, Format::Groups);
        }
    }

    #[test]
    fn trie_content_type_beats_grouped() {
        let p = IngestParams::resolve(Some("name=app&grouped=1"), Some(TRIE_CONTENT_TYPE), NOW)
            .expect("resolve");
        assert!(p.grouped);
        assert_eq!(p.format, Format::Trie);
    }

    #[test]
    fn parses_time_range_and_labels() {
        let p = IngestParams::resolve(
            Some("name=app.cpu%7Benv%3Dprod%7D&from=now-10s&until=1714564800&host=h%201"),
            Some("text/plain"),
            NOW,
        )
        .expect("resolve");
        assert_eq!(p.from, datetime!(2024-05-01 11:59:50 UTC));
        assert_eq!(p.until, NOW);
        assert_eq!(p.label_key, "app.cpu{env=prod,host=h 1}");
    }

    #[test]
    fn inverted_range_passes_through() {
        let p = IngestParams::resolve(Some("name=app&from=now&until=now-1h"), None, NOW)
            .expect("resolve");
        assert!(p.until < p.from);
    }

    #[test]
    fn bad_parameters_fail_before_decoding() {
        let err = IngestParams::resolve(Some("name=app&from=someday"), None, NOW)
            .expect_err("bad time");
        assert!(matches!(
            err,
            StackpileError::Time(TimeExprError::Unrecognized(_))
        ));
        assert!(err.is_client_error());

        let err = IngestParams::resolve(Some("from=now"), None, NOW).expect_err("no name");
        assert!(matches!(err, StackpileError::Label(LabelError::MissingName)));
        let err = IngestParams::resolve(None, None, NOW).expect_err("no name");
        assert!(matches!(err, StackpileError::Label(LabelError::MissingName)));
    }
}

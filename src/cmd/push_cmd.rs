//! Upload a profile file to a running server (`stackpile push ...`).

use serde::Deserialize;

use std::path::Path;

use crate::{
    Format, INGEST_PATH, PutReport, SamplingMultiplier, StackpileError, StackpileResult,
    TRIE_CONTENT_TYPE, fold_file, write_trie,
};

#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Server base URL, e.g. `http://127.0.0.1:4040`.
    pub url: String,
    /// Application name, optionally with `{k=v}` labels.
    pub name: String,
    pub grouped: bool,
    /// Pre-aggregate locally and send a transport trie.
    pub trie: bool,
    pub from: Option<String>,
    pub until: Option<String>,
    /// Extra `key=value` labels sent as query parameters.
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

pub fn push_command(path: &Path, opts: &PushOptions) -> StackpileResult<PutReport> {
    let (content_type, body) = if opts.trie {
        let format = if opts.grouped {
            Format::Groups
        } else {
            Format::Lines
        };
        let batch = fold_file(path, format, SamplingMultiplier::ONE)?;
        let mut body = Vec::new();
        write_trie(&batch.tree, &mut body)?;
        tracing::debug!(
            pairs = batch.pairs,
            bytes = body.len(),
            "encoded transport trie"
        );
        (TRIE_CONTENT_TYPE, body)
    } else {
        ("text/plain", std::fs::read(path)?)
    };

    let url = format!(
        "{}{INGEST_PATH}?{}",
        opts.url.trim_end_matches('/'),
        ingest_query(opts)
    );
    tracing::debug!("pushing {} bytes to {url}", body.len());
    let resp = match ureq::post(&url)
        .set("Content-Type", content_type)
        .send_bytes(&body)
    {
        Ok(resp) => resp,
        Err(ureq::Error::Status(status, resp)) => {
            let text = resp.into_string().unwrap_or_default();
            let detail = match serde_json::from_str::<ServerError>(&text) {
                Ok(e) => format!("{}: {}", e.code, e.message),
                Err(_) => text,
            };
            return Err(StackpileError::Http(format!(
                "server answered {status}: {detail}"
            )));
        }
        Err(err) => return Err(StackpileError::Http(err.to_string())),
    };
    Ok(serde_json::from_str(&resp.into_string()?)?)
}

fn ingest_query(opts: &PushOptions) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("name", &opts.name);
    if opts.grouped {
        query.append_key_only("grouped");
    }
    if let Some(from) = &opts.from {
        query.append_pair("from", from);
    }
    if let Some(until) = &opts.until {
        query.append_pair("until", until);
    }
    for (k, v) in &opts.labels {
        query.append_pair(k, v);
    }
    query.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IngestServer, Ingester, MemoryStorage, query_pairs, testing::TmpDir};
    use std::sync::Arc;

    fn options(url: String) -> PushOptions {
        PushOptions {
            url,
            name: "app.cpu".to_string(),
            grouped: true,
            trie: false,
            from: None,
            until: None,
            labels: vec![("env".to_string(), "prod".to_string())],
        }
    }

    #[test]
    fn query_keeps_grouped_as_bare_key() {
        let mut opts = options("http://localhost".to_string());
        opts.from = Some("now-10s".to_string());
        let query = ingest_query(&opts);
        assert!(query.contains("grouped"));
        let pairs = query_pairs(&query);
        assert!(pairs.contains(&("grouped".to_string(), String::new())));
        assert!(pairs.contains(&("from".to_string(), "now-10s".to_string())));
        assert!(pairs.contains(&("env".to_string(), "prod".to_string())));
    }

    #[test]
    fn pushes_raw_and_trie_bodies() {
        let storage = Arc::new(MemoryStorage::new(3600));
        let server = IngestServer::new(Ingester::new(SamplingMultiplier::ONE, storage.clone()), 1024)
            .spawn("127.0.0.1:0".parse().expect("addr"))
            .expect("spawn");
        let dir = TmpDir::new("push");
        let path = dir.path().join("cpu.txt");
        std::fs::write(&path, "foo;bar 5\nfoo;baz 2\n").expect("write");

        let mut opts = options(server.url(""));
        opts.from = Some("1714564800".to_string());
        opts.until = Some("1714564810".to_string());
        let raw = push_command(&path, &opts).expect("push raw");
        assert_eq!(raw.label_key, "app.cpu{env=prod}");
        assert_eq!(raw.samples, 7);

        opts.trie = true;
        let trie = push_command(&path, &opts).expect("push trie");
        assert_eq!(trie.samples, 7);
        assert!(!trie.new_bucket);

        let tree = storage
            .get("app.cpu{env=prod}", raw.from, raw.until)
            .expect("get")
            .expect("tree");
        assert_eq!(tree.total(), 14);
        assert_eq!(tree.get(["foo", "bar"]).expect("bar").self_count(), 10);
    }

    #[test]
    fn server_errors_surface_code_and_message() {
        let storage = Arc::new(MemoryStorage::new(10));
        let server = IngestServer::new(Ingester::new(SamplingMultiplier::ONE, storage), 1024)
            .spawn("127.0.0.1:0".parse().expect("addr"))
            .expect("spawn");
        let dir = TmpDir::new("push-bad");
        let path = dir.path().join("cpu.txt");
        std::fs::write(&path, "foo;bar\n").expect("write");

        let err = push_command(&path, &options(server.url(""))).expect_err("missing count");
        match err {
            StackpileError::Http(msg) => {
                assert!(msg.starts_with("server answered 400: malformed_input"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

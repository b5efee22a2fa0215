//! Line-based log scrapers.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::entry::Entry;
use crate::filter::Filter;

/// Scraper for services that log one JSON object per line.
#[derive(Clone, Default)]
pub struct JsonScraper {
    key_filter: Option<Arc<dyn Filter>>,
    /// Wrap lines that are not valid JSON in a default entry instead of
    /// dropping them.
    scrape_unparseable: bool,
}

impl JsonScraper {
    pub fn new(key_filter: Option<Arc<dyn Filter>>, scrape_unparseable: bool) -> Self {
        Self {
            key_filter,
            scrape_unparseable,
        }
    }

    /// Starts scraping lines from `reader` and returns the entry channel.
    /// Scraping continues until the reader hits EOF.
    pub fn start_scraping(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> mpsc::Receiver<Entry> {
        let (tx, rx) = mpsc::channel(64);
        let scraper = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(entry) = scraper.scrape_line(&line) else {
                            continue;
                        };
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        error!(error = %err, "Service log scraping failed");
                        return;
                    }
                }
            }
        });
        rx
    }

    fn scrape_line(&self, line: &str) -> Option<Entry> {
        match serde_json::from_str::<Entry>(line) {
            Ok(mut entry) => {
                if let Some(filter) = &self.key_filter {
                    entry.retain(|key, _| !filter.matches(key));
                }
                Some(entry)
            }
            Err(err) => {
                debug!(error = %err, "Unable to unmarshal log entry");
                self.scrape_unparseable.then(|| wrap_in_default(line))
            }
        }
    }
}

/// Scraper for services that log in logfmt (`key=value ...`) format.
///
/// See: <https://brandur.org/logfmt>
#[derive(Clone, Default)]
pub struct LogfmtScraper {
    key_filter: Option<Arc<dyn Filter>>,
}

impl LogfmtScraper {
    pub fn new(key_filter: Option<Arc<dyn Filter>>) -> Self {
        Self { key_filter }
    }

    /// Starts scraping records from `reader`, one per line, until EOF.
    pub fn start_scraping(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> mpsc::Receiver<Entry> {
        let (tx, rx) = mpsc::channel(64);
        let scraper = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let mut entry = parse_logfmt(&line);
                        if let Some(filter) = &scraper.key_filter {
                            entry.retain(|key, _| !filter.matches(key));
                        }
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        error!(error = %err, "Service log scraping failed");
                        return;
                    }
                }
            }
        });
        rx
    }
}

/// Parses one logfmt record. Values may be bare or double-quoted with
/// backslash escapes; keys without `=` get an empty value.
fn parse_logfmt(line: &str) -> Entry {
    let mut entry = Entry::new();
    let mut chars = line.chars().peekable();

    while chars.peek().is_some() {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            chars.next();
            continue;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }
        entry.insert(key, Value::String(value));
    }
    entry
}

/// Wraps a non-JSON line in an entry so it still reaches the log sink.
fn wrap_in_default(line: &str) -> Entry {
    let mut entry = Entry::new();
    entry.insert(
        "time".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
    entry.insert("level".into(), Value::String("INFO".into()));
    entry.insert("logger".into(), Value::String("invalid-format".into()));
    entry.insert("msg".into(), Value::String(line.to_string()));
    entry
}

#[cfg(test)]
mod tests {
    use crate::filter::ValueFilter;

    use super::*;

    fn reader(content: &str) -> Box<dyn AsyncRead + Send + Unpin> {
        Box::new(std::io::Cursor::new(content.to_string().into_bytes()))
    }

    #[tokio::test]
    async fn scrapes_json_lines_into_entries() {
        let scraper = JsonScraper::default();
        let mut entries = scraper.start_scraping(reader(
            "{\"msg\":\"started\",\"level\":\"INFO\"}\n{\"msg\":\"ready\"}\n",
        ));

        let first = entries.recv().await.unwrap();
        assert_eq!(first["msg"], "started");
        let second = entries.recv().await.unwrap();
        assert_eq!(second["msg"], "ready");
        assert!(entries.recv().await.is_none());
    }

    #[tokio::test]
    async fn filtered_keys_are_removed() {
        let filter = Arc::new(ValueFilter {
            values: vec!["password".into()],
        });
        let scraper = JsonScraper::new(Some(filter), false);
        let mut entries =
            scraper.start_scraping(reader("{\"msg\":\"login\",\"password\":\"hunter2\"}\n"));

        let entry = entries.recv().await.unwrap();
        assert_eq!(entry["msg"], "login");
        assert!(!entry.contains_key("password"));
    }

    #[tokio::test]
    async fn unparseable_lines_are_dropped_by_default() {
        let scraper = JsonScraper::default();
        let mut entries = scraper.start_scraping(reader("plain text\n{\"msg\":\"ok\"}\n"));
        let entry = entries.recv().await.unwrap();
        assert_eq!(entry["msg"], "ok");
    }

    #[test]
    fn logfmt_parses_bare_and_quoted_values() {
        let entry = parse_logfmt(r#"level=info msg="service started on \"port\" 8080" ready"#);
        assert_eq!(entry["level"], "info");
        assert_eq!(entry["msg"], "service started on \"port\" 8080");
        assert_eq!(entry["ready"], "");
    }

    #[tokio::test]
    async fn logfmt_scraper_honors_the_key_filter() {
        let filter = Arc::new(ValueFilter {
            values: vec!["token".into()],
        });
        let scraper = LogfmtScraper::new(Some(filter));
        let mut entries = scraper.start_scraping(reader("level=info token=abc msg=hello\n"));
        let entry = entries.recv().await.unwrap();
        assert_eq!(entry["msg"], "hello");
        assert!(!entry.contains_key("token"));
        assert!(entries.recv().await.is_none());
    }

    #[tokio::test]
    async fn unparseable_lines_can_be_wrapped() {
        let scraper = JsonScraper::new(None, true);
        let mut entries = scraper.start_scraping(reader("plain text\n"));
        let entry = entries.recv().await.unwrap();
        assert_eq!(entry["msg"], "plain text");
        assert_eq!(entry["logger"], "invalid-format");
        assert!(entry.contains_key("time"));
    }
}

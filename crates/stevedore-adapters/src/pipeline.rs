//! Wiring of the Logstash scraping pipeline into the executor.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use stevedore_core::command::{ChildOutput, OutputSink};
use stevedore_core::ScrapePipeline;
use stevedore_proto::TaskDescriptor;
use tokio::sync::mpsc;
use tracing::error;

use crate::appender::{Appender, LogstashAppender, LogstashConfig};
use crate::entry::{extend, Entry, Extender, StaticDataExtender, SystemDataExtender};
use crate::filter::ValueFilter;
use crate::scraper::JsonScraper;

/// Task label carrying the service catalogue id attached to scraped logs.
const SCID_LABEL: &str = "scId";

/// Task label that enables scraping of lines that are not valid JSON.
const SCRAPE_ALL_LABEL: &str = "log-scraping-all";

/// Builds Logstash-backed sinks for tasks labelled `log-scraping=logstash`.
pub struct LogstashPipeline {
    ignore_keys: Vec<String>,
}

impl LogstashPipeline {
    pub fn new(ignore_keys: Vec<String>) -> Self {
        Self { ignore_keys }
    }
}

impl ScrapePipeline for LogstashPipeline {
    fn attach(&self, task: &TaskDescriptor) -> anyhow::Result<Box<dyn OutputSink>> {
        let scid: i64 = task
            .label_value(SCID_LABEL)
            .ok_or_else(|| anyhow::anyhow!("missing {SCID_LABEL} label"))?
            .parse()
            .map_err(|err| anyhow::anyhow!("cannot parse scid: {err}"))?;
        // Fail the launch on bad configuration; connecting happens later,
        // once the child's pipes exist.
        let config = LogstashConfig::from_env()?;

        let filter = (!self.ignore_keys.is_empty()).then(|| {
            Arc::new(ValueFilter {
                values: self.ignore_keys.clone(),
            }) as Arc<dyn crate::filter::Filter>
        });
        let scraper = JsonScraper::new(filter, task.label_value(SCRAPE_ALL_LABEL).is_some());

        let mut static_data = Entry::new();
        static_data.insert(
            "instance-id".into(),
            Value::String(task.executor_id.to_string()),
        );
        static_data.insert("scid".into(), Value::from(scid));
        let extenders: Vec<Box<dyn Extender>> = vec![
            Box::new(StaticDataExtender { data: static_data }),
            Box::new(SystemDataExtender),
        ];

        Ok(Box::new(LogstashSink {
            scraper,
            extenders,
            config,
        }))
    }
}

struct LogstashSink {
    scraper: JsonScraper,
    extenders: Vec<Box<dyn Extender>>,
    config: LogstashConfig,
}

#[async_trait]
impl OutputSink for LogstashSink {
    async fn consume(self: Box<Self>, output: ChildOutput) {
        let stdout_entries = self.scraper.start_scraping(Box::new(output.stdout));
        let stderr_entries = self.scraper.start_scraping(Box::new(output.stderr));
        let merged = merge(stdout_entries, stderr_entries);
        let mut extended = extend(merged, self.extenders);

        match LogstashAppender::connect(&self.config).await {
            Ok(appender) => Box::new(appender).append(extended).await,
            Err(err) => {
                error!(error = %err, "Cannot reach the log sink, discarding service logs");
                while extended.recv().await.is_some() {}
            }
        }
    }
}

/// Funnels both output pipes into one entry channel, like a shared pipe
/// would.
fn merge(
    mut left: mpsc::Receiver<Entry>,
    mut right: mpsc::Receiver<Entry>,
) -> mpsc::Receiver<Entry> {
    let (tx, rx) = mpsc::channel(64);
    let tx_right = tx.clone();
    tokio::spawn(async move {
        while let Some(entry) = left.recv().await {
            if tx.send(entry).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        while let Some(entry) = right.recv().await {
            if tx_right.send(entry).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use stevedore_proto::{CommandSpec, ExecutorId, FrameworkId, Label, Labels, TaskId};

    use super::*;

    fn task(labels: Vec<Label>) -> TaskDescriptor {
        TaskDescriptor {
            task_id: TaskId::from("task-1"),
            executor_id: ExecutorId::from("executor-1"),
            framework_id: FrameworkId::from("framework-1"),
            command: CommandSpec {
                shell: true,
                value: "true".into(),
                arguments: vec![],
                environment: vec![],
            },
            ports: vec![],
            labels: Labels::new(labels),
            health_check: None,
            kill_policy: None,
        }
    }

    #[test]
    fn attach_requires_a_parseable_scid_label() {
        let pipeline = LogstashPipeline::new(vec![]);
        let unlabelled = task(vec![]);
        let err = match pipeline.attach(&unlabelled) {
            Err(err) => err,
            Ok(_) => panic!("expected attach to fail for an unlabelled task"),
        };
        assert!(err.to_string().contains("scId"), "{err}");

        let garbled = task(vec![Label {
            key: SCID_LABEL.into(),
            value: "not-a-number".into(),
        }]);
        assert!(pipeline.attach(&garbled).is_err());
    }

    #[tokio::test]
    async fn merge_delivers_entries_from_both_sides() {
        let (left_tx, left_rx) = mpsc::channel(4);
        let (right_tx, right_rx) = mpsc::channel(4);
        let mut merged = merge(left_rx, right_rx);

        let mut entry_left = Entry::new();
        entry_left.insert("msg".into(), Value::String("out".into()));
        let mut entry_right = Entry::new();
        entry_right.insert("msg".into(), Value::String("err".into()));
        left_tx.send(entry_left).await.unwrap();
        right_tx.send(entry_right).await.unwrap();
        drop(left_tx);
        drop(right_tx);

        let mut messages: Vec<String> = Vec::new();
        while let Some(entry) = merged.recv().await {
            messages.push(entry["msg"].as_str().unwrap().to_string());
        }
        messages.sort();
        assert_eq!(messages, vec!["err", "out"]);
    }
}

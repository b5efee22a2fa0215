//! # stevedore-adapters
//!
//! Collaborator implementations for the executor core:
//! - The service-log scraping pipeline (JSON scraper, key filters, entry
//!   extenders, Logstash appender)
//! - The exec hook, which runs external commands on lifecycle events

mod appender;
mod entry;
mod exec_hook;
mod filter;
mod pipeline;
mod scraper;

pub use appender::{Appender, LogstashAppender, LogstashConfig, LogstashProtocol};
pub use entry::{extend, Entry, Extender, StaticDataExtender, SystemDataExtender};
pub use exec_hook::ExecHook;
pub use filter::{Filter, ValueFilter};
pub use pipeline::LogstashPipeline;
pub use scraper::{JsonScraper, LogfmtScraper};

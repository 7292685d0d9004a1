use colored::Colorize;

pub mod crawl;
pub mod data;
pub mod error;
pub mod graph;
pub mod sink;
pub mod tabular;

pub use crawl::{CollectReport, CrawlOptions, CrawlReport, execute_collect, execute_crawl};
pub use data::Database;
pub use error::StoreError;
pub use graph::{GraphStore, MemoryGraphStore, PageRecord, SessionStatus};
pub use sink::Persistence;
pub use tabular::{AppendOutcome, TabularSink};

pub fn print_banner() {
    let banner = r#"
     _        _                             _
 ___| |_ __ _| |_ ___  __ _ _ __ __ _ _ __ | |__
/ __| __/ _` | __/ _ \/ _` | '__/ _` | '_ \| '_ \
\__ \ || (_| | ||  __/ (_| | | | (_| | |_) | | | |
|___/\__\__,_|\__\___|\__, |_|  \__,_| .__/|_| |_|
                      |___/          |_|
"#;
    eprintln!("{}", banner.cyan());
    eprintln!(
        "  {} {}\n",
        "authenticated UI state-graph crawler".bright_black(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
}

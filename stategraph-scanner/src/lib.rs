pub mod browser;
pub mod collector;
pub mod driver;
pub mod error;
pub mod explorer;
pub mod extract;
pub mod login;
pub mod orchestrator;
pub mod processor;
pub mod result;
pub mod session;
pub mod signature;
pub mod snapshot;
pub mod url;

pub use browser::{Browser, LoadState, Page, Target, Timeouts};
pub use collector::{CollectSettings, UrlCollector, UrlSink};
pub use driver::HttpBrowser;
pub use error::ScanError;
pub use explorer::{ClickExplorer, Exploration};
pub use extract::{ActionType, Interaction};
pub use login::{Credentials, LoginOutcome};
pub use orchestrator::{CrawlOrchestrator, CrawlSettings, ProgressCallback, StateSink};
pub use processor::InteractionProcessor;
pub use result::{CollectSummary, CrawlSummary, Edge, StopReason, Transition};
pub use session::SessionContext;
pub use signature::ElementSignature;
pub use snapshot::PageState;

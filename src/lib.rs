pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod poller;
pub mod snapshot;
pub mod summary;
pub mod transport;

pub use api::{AnalysisParams, ApiClient, JobHandle, SavingsTarget};
pub use config::{Config, Credentials};
pub use dispatcher::Dispatcher;
pub use error::{RequestError, RequestOutcome};
pub use poller::{JobOutcome, JobPoller, JobReport, JobState, PollPolicy, ProgressSink};
pub use snapshot::{GenerationResult, JobSnapshot};
pub use summary::AnalysisSummary;
pub use transport::{HttpTransport, ReqwestTransport};

pub type Result<T> = anyhow::Result<T>;

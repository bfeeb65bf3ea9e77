//! 能扛住断网和进程重启的持久化下载队列

pub mod clock;
pub mod error;
pub mod events;
pub mod models;
pub mod network;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod transport;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DownloadError;
pub use events::QueueEvent;
pub use models::{DownloadItem, DownloadStatus, ItemPatch, NetworkState, QueueStatus, Resource};
pub use network::{ConnectivityProbe, NetworkMonitor};
pub use resolver::{CatalogResolver, ResourceResolver, UrlResolver};
pub use retry::RetryPolicy;
pub use scheduler::{Collaborators, QueueScheduler, Subscription};
pub use sink::{DirectorySink, FileSink};
pub use store::{FileStore, MemoryStore, Store};
pub use transport::{HttpTransport, TransferStream, Transport};
pub use worker::{JobLease, JobReporter, TransferWorker};

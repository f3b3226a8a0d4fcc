pub mod types;
pub mod params;
pub mod transport;
pub mod retry;
pub mod payload;
pub mod submitter;
pub mod poller;
pub mod results;
pub mod controller;
pub mod document;

pub use types::*;
pub use params::{McResolution, MeshParams, PolygonQuality, RemeshOption, SegmentParams, VideoParams};
pub use transport::{check_health, HttpTransport, MockTransport, Outcome, RecordedCall, Transport};
pub use payload::PayloadStrategy;
pub use submitter::JobSubmitter;
pub use poller::StatusPoller;
pub use controller::{JobController, JobLease};
pub use document::{apply_result, FileDocument};
pub use interfaces::DocumentAdapter;

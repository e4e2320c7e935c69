pub mod auth;
pub mod channels;
pub mod error;
pub mod jobs;
pub mod messages;
pub mod middleware;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use jobs::{Job, JobQueue, TracingJobQueue};

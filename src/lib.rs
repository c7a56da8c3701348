pub mod config;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

use std::sync::Arc;

use config::Config;
use schedule::JobSupervisor;

pub struct AppContext {
    pub supervisor: Arc<JobSupervisor>,
    pub config: Arc<Config>,
}

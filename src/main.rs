#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use transcript_rs::{
    config::Config,
    schedule::{build_stages, JobSupervisor},
    storage::job::InMemoryJobStore,
    utils::logger,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 读取配置并创建必要的目录
    let config = Config::from_env()?;
    config.ensure_dirs()?;

    // 初始化日志系统
    let _guard = logger::init(&config.log_dir)?;

    info!("Starting transcript service ({})...", env!("GIT_HASH"));

    // 初始化处理阶段
    info!("Initializing pipeline stages...");
    let stages = build_stages(&config)?;

    // 初始化 storage
    info!("Initializing job store (capacity {})...", config.max_jobs_in_memory);
    let store = Arc::new(InMemoryJobStore::new(config.max_jobs_in_memory));

    // 初始化任务调度器
    info!("Initializing job supervisor...");
    let supervisor = JobSupervisor::new(&config, store, stages)?;

    // 创建应用上下文
    let addr = config.socket_addr()?;
    let ctx = Arc::new(AppContext {
        supervisor: Arc::new(supervisor),
        config: Arc::new(config),
    });

    // 启动 HTTP 服务器
    info!("Starting HTTP server at http://{}", addr);
    match transcript_rs::web::start_server(ctx, addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

pub mod types;
pub mod processors;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod tests;

// 重导出主要类型
pub use types::{
    ArtifactKind, Artifacts, Job, JobRequest, JobSource, JobStatus, JobSummary, Stage, StageProgress,
    TimeRange, TimedSegment,
};

// 重导出处理器接口
pub use processors::{
    build_stages, Downloader, ExtractedAudio, Renderer, StageContext, StageSet, Transcriber, Translator,
};

// 重导出调度器接口
pub use scheduler::{CleanupScheduler, JobOrchestrator, JobSupervisor, StageRunner};

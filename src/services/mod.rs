pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod storage;
pub mod watermark;

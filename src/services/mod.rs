pub mod file_service;
pub mod key_service;
pub mod locks;
pub mod rate_limiter;
pub mod session_service;
pub mod share_service;
pub mod signature;
pub mod stats;
pub mod storage_service;
pub mod trash_service;

//! # FDL (File Download)
//!
//! TCP 기반 단일 파일 다운로드 서버/클라이언트
//!
//! ## 핵심 특징
//! - **수용 제어**: 고정 워커 수 + 대기 큐, 포화 시 직접 실행 또는 거부
//! - **청크 전송**: 서버가 정한 청크 크기로 끊어서 전송, 메모리 사용량 고정
//! - **길이 기반 종료**: 청크 사이 구분자 없이 선언된 파일 크기로 종료 판단
//! - **원자적 통계**: 전체/성공 요청 수를 모든 워커가 공유

pub mod chunk;
pub mod config;
pub mod error;
pub mod listener;
pub mod message;
pub mod pool;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use config::{AdmissionPolicy, ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use listener::{Server, ServerMonitor};
pub use message::{ResponseHeader, TransferDescriptor};
pub use pool::{Admission, PoolSnapshot, WorkerPool};
pub use receiver::{DownloadOutcome, Receiver};
pub use sender::{Sender, SessionOutcome, SessionState};
pub use stats::{ServerStats, StatsSnapshot, TransferStats};

/// 기본 포트
pub const DEFAULT_PORT: u16 = 8000;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: u32 = 4096; // 4KB

/// 기본 워커 수
pub const DEFAULT_WORKERS: usize = 10;

/// 종료 시 기본 대기 시간 (밀리초)
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

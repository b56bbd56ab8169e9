//! 서버 / 클라이언트 설정

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_WORKERS};

/// 워커가 모두 바쁠 때 새 연결 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// 큐에 넣고 워커가 비면 실행, 유한 큐가 가득 차면 가장 새 연결 거부
    #[default]
    QueueAndRun,

    /// 유한 큐가 가득 차면 accept 경로에서 직접 실행
    CallerRuns,

    /// 유한 큐가 가득 차면 거부 (큐 크기 미지정 시 워커 수)
    RejectOnFull,
}

impl AdmissionPolicy {
    /// 큐 크기 제한이 필수인 정책인지
    pub fn requires_bound(&self) -> bool {
        !matches!(self, AdmissionPolicy::QueueAndRun)
    }
}

impl FromStr for AdmissionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" | "queue-and-run" => Ok(Self::QueueAndRun),
            "caller-runs" | "caller" => Ok(Self::CallerRuns),
            "reject" | "reject-on-full" => Ok(Self::RejectOnFull),
            other => Err(Error::InvalidConfig(format!("알 수 없는 정책: {other}"))),
        }
    }
}

/// 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 바인드 주소
    pub bind_addr: SocketAddr,

    /// 제공할 파일 디렉터리
    pub files_dir: PathBuf,

    /// 전송 청크 크기 (바이트), 디스크립터로 클라이언트에 전달
    pub chunk_size: u32,

    /// 동시 세션 수 (워커 수)
    pub workers: usize,

    /// 대기 큐 크기 (None = 무제한)
    pub queue_capacity: Option<usize>,

    /// 포화 시 정책
    pub policy: AdmissionPolicy,

    /// 종료 시 진행 중 세션 대기 시간
    pub shutdown_grace: Duration,

    /// 인사/종료 메시지 전송 (개정 프로토콜)
    pub announce: bool,

    /// 피어 읽기 유휴 타임아웃 (None = 무제한)
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            files_dir: PathBuf::from("files"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            policy: AdmissionPolicy::QueueAndRun,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            announce: false,
            read_timeout: None,
        }
    }
}

impl ServerConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 초기 버전 동작: 워커 10개, 무제한 큐, 인사 메시지 없음
    pub fn legacy() -> Self {
        Self::default()
    }

    /// 개정 버전 동작: 워커 2개, 인사/종료 메시지, 포화 시 직접 실행
    pub fn revised() -> Self {
        Self {
            workers: 2,
            queue_capacity: Some(8),
            policy: AdmissionPolicy::CallerRuns,
            announce: true,
            ..Self::default()
        }
    }

    /// 정책에 맞춘 실제 큐 크기
    pub fn effective_queue_capacity(&self) -> Option<usize> {
        match self.queue_capacity {
            Some(n) => Some(n),
            None if self.policy.requires_bound() => Some(self.workers),
            None => None,
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers 는 1 이상이어야 함".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size 는 1 이상이어야 함".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(Error::InvalidConfig("queue_capacity 는 1 이상이어야 함".into()));
        }
        Ok(())
    }
}

/// 클라이언트 설정
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 다운로드 저장 디렉터리
    pub downloads_dir: PathBuf,

    /// 서버 인사/종료 메시지 기대 여부
    pub announce: bool,

    /// 허용할 최대 청크 크기 (서버 선언값 상한)
    pub max_chunk_size: u32,

    /// 읽기 유휴 타임아웃
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            announce: false,
            max_chunk_size: 16 * 1024 * 1024, // 16MB
            read_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(Error::InvalidConfig("max_chunk_size 는 1 이상이어야 함".into()));
        }
        Ok(())
    }
}

//! 서버 리스너 루프
//!
//! 연결을 수락해서 작업 단위로 워커 풀에 제출.
//! 개별 연결/자원 부족 에러는 건너뛰고, 리스닝 소켓 자체의 에러만 루프 종료 사유.
//! 종료 시 풀은 유예 시간 동안 드레인

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::pool::{Admission, PoolSnapshot, WorkerPool};
use crate::sender::Sender;
use crate::stats::{ServerStats, StatsSnapshot};
use crate::{Error, Result};

/// 자원 부족 (EMFILE 등) 시 재시도 전 대기
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// accept 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// 해당 연결만 실패. 바로 다음 accept
    Connection,

    /// 파일 디스크립터/버퍼 부족 등. 잠시 대기 후 재시도
    Resources,

    /// 리스닝 소켓 자체가 사용 불가
    Listener,
}

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    use io::ErrorKind::*;

    match e.kind() {
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock
        | TimedOut => AcceptFailure::Connection,
        InvalidInput | Unsupported | NotConnected => AcceptFailure::Listener,
        // EMFILE, ENFILE, ENOBUFS (구체적 kind 없음), ENOMEM (OutOfMemory)
        _ => AcceptFailure::Resources,
    }
}

/// 수락된 연결 (풀 작업 단위)
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// 실행 중인 서버 상태 조회 핸들
#[derive(Clone)]
pub struct ServerMonitor {
    stats: Arc<ServerStats>,
    pool: Arc<WorkerPool<Connection>>,
}

impl ServerMonitor {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pool(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }
}

/// 파일 서버
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    stats: Arc<ServerStats>,
    pool: Arc<WorkerPool<Connection>>,
}

impl Server {
    /// 바인딩 및 워커 시작
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let stats = Arc::new(ServerStats::new());
        let sender = Sender::new(&config, stats.clone());

        let pool = Arc::new(WorkerPool::start(
            config.workers,
            config.effective_queue_capacity(),
            config.policy,
            move |conn: Connection| {
                let sender = sender.clone();
                async move {
                    // 에러는 세션 안에서 기록됨
                    let _ = sender.serve(conn.stream, conn.peer).await;
                }
            },
        ));

        info!("Listening on {}", listener.local_addr()?);
        info!("Serving files from {:?}", config.files_dir);
        info!("Chunk size: {} bytes", config.chunk_size);

        Ok(Self {
            listener,
            config,
            stats,
            pool,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// 요청 통계 (공유)
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    pub fn monitor(&self) -> ServerMonitor {
        ServerMonitor {
            stats: self.stats.clone(),
            pool: self.pool.clone(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 리스닝 소켓 자체가 실패할 때까지 실행
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// `shutdown` 이 끝나거나 리스닝 소켓이 실패할 때까지 실행
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => match classify_accept_error(&e) {
                        AcceptFailure::Connection => {
                            debug!("연결 수락 중 연결 실패 (무시): {}", e);
                        }
                        AcceptFailure::Resources => {
                            warn!("연결 수락 실패, {:?} 후 재시도: {}", ACCEPT_BACKOFF, e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                        AcceptFailure::Listener => {
                            error!("리스닝 소켓 실패, 리스너 종료: {}", e);
                            break Err(Error::Io(e));
                        }
                    },
                },
            }
        };

        let Server {
            listener,
            config,
            stats,
            pool,
        } = self;
        drop(listener);

        pool.shutdown(config.shutdown_grace).await;

        let snap = stats.snapshot();
        info!(
            "Server stopped: {} requests, {} successful",
            snap.total_requests, snap.successful_requests
        );
        result
    }

    async fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY 설정 실패 {}: {}", peer, e);
        }

        match self.pool.submit(Connection { stream, peer }).await {
            Admission::Queued => debug!("연결 {} 큐에 추가", peer),
            Admission::RanInline => debug!("연결 {} 직접 처리 완료", peer),
            Admission::Rejected(conn) => {
                let snap = self.pool.snapshot();
                warn!(
                    "연결 거부 {} (active={}, pending={})",
                    conn.peer, snap.active, snap.pending
                );
                drop(conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_exhaustion_keeps_listening() {
        // EMFILE / ENFILE
        for code in [24, 23] {
            let e = io::Error::from_raw_os_error(code);
            assert_eq!(classify_accept_error(&e), AcceptFailure::Resources);
        }
        let oom = io::Error::from(io::ErrorKind::OutOfMemory);
        assert_eq!(classify_accept_error(&oom), AcceptFailure::Resources);
    }

    #[test]
    fn test_per_connection_errors_are_skipped() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(
                classify_accept_error(&io::Error::from(kind)),
                AcceptFailure::Connection
            );
        }
    }

    #[test]
    fn test_broken_listener_is_fatal() {
        let e = io::Error::from(io::ErrorKind::InvalidInput);
        assert_eq!(classify_accept_error(&e), AcceptFailure::Listener);
    }
}

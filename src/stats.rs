//! 서버 요청 통계 및 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 프로세스 전체 요청 통계
///
/// 모든 워커가 `Arc` 로 공유. 리셋 없음.
/// `total` 을 먼저 증가시키고 스냅샷은 `successful` 을 먼저 읽으므로
/// 어떤 스냅샷에서도 `successful <= total` 이 성립함
#[derive(Debug, Default)]
pub struct ServerStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
}

/// 통계 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 요청 기록, 이 요청의 번호 (1부터) 반환
    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 성공 기록, 누적 성공 수 반환
    pub fn record_success(&self) -> u64 {
        self.successful_requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let successful_requests = self.successful_requests.load(Ordering::SeqCst);
        let total_requests = self.total_requests.load(Ordering::SeqCst);
        StatsSnapshot {
            total_requests,
            successful_requests,
        }
    }
}

/// 단일 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 전송 바이트
    pub total_bytes: u64,

    /// 청크 수
    pub total_chunks: u64,

    /// 가장 큰 청크 크기
    pub largest_chunk: usize,

    /// 전송 바이트의 CRC32
    pub crc32: u32,

    /// 완료까지 걸린 시간
    pub elapsed: Duration,

    hasher: crc32fast::Hasher,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            total_chunks: 0,
            largest_chunk: 0,
            crc32: 0,
            elapsed: Duration::ZERO,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// 청크 기록
    pub fn record_chunk(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.total_bytes += data.len() as u64;
        self.total_chunks += 1;
        self.largest_chunk = self.largest_chunk.max(data.len());
    }

    /// 전송 종료, 체크섬과 경과 시간 확정
    pub fn finish(mut self) -> Self {
        self.crc32 = self.hasher.clone().finalize();
        self.elapsed = self.start_time.elapsed();
        self
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Bytes: {} | Chunks: {} | CRC32: {:08x} | Elapsed: {:.3}s | Throughput: {:.2} MB/s",
            self.total_bytes,
            self.total_chunks,
            self.crc32,
            self.elapsed.as_secs_f64(),
            self.throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

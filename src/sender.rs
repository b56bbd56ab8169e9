//! 송신자 (서버측 전송 세션)
//!
//! 연결 하나당 한 번 실행되는 상태 기계
//! `AwaitFilename → Lookup → (NotFound | SendHeader → Streaming → Done)`
//!
//! - 파일 없음은 정상 결과 (`found = false`)
//! - 종료 순서 고정: 파일 → 소켓 읽기 → 소켓 쓰기 → 연결

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::chunk::send_chunks;
use crate::config::ServerConfig;
use crate::message::{
    downloading_text, read_text, timed, Outbox, ResponseHeader, TransferDescriptor, COMPLETE_TEXT,
    FAREWELL_TEXT, GREETING_TEXT,
};
use crate::stats::{ServerStats, TransferStats};
use crate::Result;

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitFilename,
    Lookup,
    NotFound,
    SendHeader,
    Streaming,
    Done,
}

/// 세션 결과
#[derive(Debug)]
pub enum SessionOutcome {
    /// 파일 이름 수신 전 연결 종료 (통계 변화 없음)
    Disconnected,

    /// 요청 파일 없음
    NotFound,

    /// 전송 완료
    Transferred(TransferStats),
}

/// 세션별 소유 자원
struct Session {
    state: SessionState,
    source: Option<File>,
}

/// 세션 실행기 (워커 간 공유)
#[derive(Debug, Clone)]
pub struct Sender {
    files_dir: PathBuf,
    chunk_size: u32,
    announce: bool,
    read_timeout: Option<Duration>,
    stats: Arc<ServerStats>,
}

impl Sender {
    pub fn new(config: &ServerConfig, stats: Arc<ServerStats>) -> Self {
        Self {
            files_dir: config.files_dir.clone(),
            chunk_size: config.chunk_size,
            announce: config.announce,
            read_timeout: config.read_timeout,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// 연결 하나 처리
    ///
    /// 에러는 여기서 기록하고 반환만 함. 워커나 리스너로 전파하지 않음.
    pub async fn serve<S>(&self, stream: S, peer: SocketAddr) -> Result<SessionOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!("Client {} connected", peer);

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut session = Session {
            state: SessionState::AwaitFilename,
            source: None,
        };

        let result = self.run(&mut session, &mut reader, &mut writer, peer).await;
        if let Err(e) = &result {
            warn!("세션 중단 ({}, {:?}): {}", peer, session.state, e);
        }

        // 입력 스트림
        drop(session.source.take());
        // 소켓 읽기
        drop(reader);
        // 소켓 쓰기. 중단된 세션에는 아무것도 더 보내지 않음
        // (수신측이 남은 페이로드로 읽게 됨)
        let completed = matches!(
            result,
            Ok(SessionOutcome::NotFound | SessionOutcome::Transferred(_))
        );
        if self.announce && completed {
            let mut outbox = Outbox::new();
            let farewell = match outbox.text(FAREWELL_TEXT) {
                Ok(outbox) => outbox.send(&mut writer).await,
                Err(e) => Err(e),
            };
            if let Err(e) = farewell {
                debug!("종료 메시지 전송 실패 (무시): {}", e);
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("소켓 종료 실패 (무시): {}", e);
        }
        drop(writer);

        info!("Client {} disconnected", peer);
        result
    }

    async fn run<R, W>(
        &self,
        session: &mut Session,
        reader: &mut R,
        writer: &mut W,
        peer: SocketAddr,
    ) -> Result<SessionOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut outbox = Outbox::new();

        if self.announce {
            outbox.text(GREETING_TEXT)?.send(writer).await?;
        }

        // ── AwaitFilename ──
        session.state = SessionState::AwaitFilename;
        let filename = match timed(self.read_timeout, read_text(reader)).await {
            Ok(name) => name,
            Err(e) if e.is_disconnect() => {
                debug!("파일 이름 수신 전 연결 종료: {}", peer);
                return Ok(SessionOutcome::Disconnected);
            }
            Err(e) => return Err(e),
        };

        // ── Lookup ──
        session.state = SessionState::Lookup;
        let request_no = self.stats.record_request();
        info!(
            "REQ {}: File {} requested from {}",
            request_no,
            filename,
            peer.ip()
        );

        let Some((file, file_size)) = self.lookup(&filename).await else {
            // ── NotFound ──
            session.state = SessionState::NotFound;
            info!("REQ {}: Not Successful", request_no);

            let header = ResponseHeader::new(&filename, false, &self.stats.snapshot());
            outbox.header(&header)?.send(writer).await?;
            return Ok(SessionOutcome::NotFound);
        };

        // ── SendHeader ──
        session.state = SessionState::SendHeader;
        let successful = self.stats.record_success();
        info!("REQ {}: Successful", request_no);
        info!(
            "REQ {}: Total Successful requests so far = {}",
            request_no, successful
        );

        let source = session.source.insert(file);
        let descriptor = TransferDescriptor::new(file_size, self.chunk_size);
        let header = ResponseHeader::new(&filename, true, &self.stats.snapshot());
        outbox
            .header(&header)?
            .text(&downloading_text(&filename))?
            .descriptor(&descriptor)
            .send(writer)
            .await?;

        // ── Streaming ──
        session.state = SessionState::Streaming;
        let stats = send_chunks(source, writer, &descriptor).await?;

        // ── Done ──
        session.state = SessionState::Done;
        outbox.text(COMPLETE_TEXT)?.send(writer).await?;

        info!("REQ {}: File transfer complete", request_no);
        debug!("REQ {}: {}", request_no, stats.summary());

        Ok(SessionOutcome::Transferred(stats))
    }

    /// 파일 조회. 없거나 일반 파일이 아니면 None
    ///
    /// 경로 정규화/탈출 방지는 하지 않음
    async fn lookup(&self, filename: &str) -> Option<(File, u64)> {
        let path = self.files_dir.join(filename);

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("파일 열기 실패 {:?}: {}", path, e);
                return None;
            }
        };

        match file.metadata().await {
            Ok(metadata) if metadata.is_file() => Some((file, metadata.len())),
            Ok(_) => None,
            Err(e) => {
                warn!("파일 메타데이터 실패 {:?}: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{read_bool, TransferDescriptor};
    use crate::stats::StatsSnapshot;
    use crate::Error;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn pattern_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn sender_for(dir: &Path, chunk_size: u32, announce: bool) -> Sender {
        let config = ServerConfig {
            files_dir: dir.to_path_buf(),
            chunk_size,
            announce,
            ..ServerConfig::default()
        };
        Sender::new(&config, Arc::new(ServerStats::new()))
    }

    async fn send_filename(client: &mut DuplexStream, name: &str) {
        let mut outbox = Outbox::new();
        outbox.text(name).unwrap().send(client).await.unwrap();
    }

    #[tokio::test]
    async fn test_found_file_is_streamed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.txt"), b"seventeen bytes!!").unwrap();
        let sender = sender_for(dir.path(), 4096, false);

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        send_filename(&mut client, "report.txt").await;
        let header = ResponseHeader::read(&mut client).await.unwrap();
        assert!(header.found);
        assert_eq!(header.lookup_message, "File report.txt found at server");
        assert_eq!(
            header.stats_message,
            "Server handled 1 requests, 1 requests were successful"
        );
        assert_eq!(read_text(&mut client).await.unwrap(), "Downloading file report.txt");

        let descriptor = TransferDescriptor::read(&mut client).await.unwrap();
        assert_eq!(descriptor, TransferDescriptor::new(17, 4096));

        let mut payload = vec![0u8; 17];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"seventeen bytes!!");
        assert_eq!(read_text(&mut client).await.unwrap(), COMPLETE_TEXT);

        let outcome = task.await.unwrap().unwrap();
        match outcome {
            SessionOutcome::Transferred(stats) => {
                assert_eq!(stats.total_bytes, 17);
                assert_eq!(stats.total_chunks, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_ends_after_flag() {
        let dir = tempfile::tempdir().unwrap();
        let sender = sender_for(dir.path(), 4096, false);

        let (mut client, server) = tokio::io::duplex(4096);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        send_filename(&mut client, "missing.bin").await;
        let header = ResponseHeader::read(&mut client).await.unwrap();
        assert!(!header.found);
        assert_eq!(header.lookup_message, "File missing.bin not found at server");

        // 디스크립터 없이 연결 종료
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        assert!(matches!(task.await.unwrap().unwrap(), SessionOutcome::NotFound));
        let snap = sender.stats().snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.successful_requests, 0);
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let sender = sender_for(dir.path(), 4096, false);

        let (mut client, server) = tokio::io::duplex(4096);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        send_filename(&mut client, "nested").await;
        let header = ResponseHeader::read(&mut client).await.unwrap();
        assert!(!header.found);
        assert!(matches!(task.await.unwrap().unwrap(), SessionOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_disconnect_before_filename_leaves_stats_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sender = sender_for(dir.path(), 4096, false);

        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let outcome = sender.serve(server, peer()).await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Disconnected));
        assert_eq!(sender.stats().snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn test_announce_variant_sends_greeting_and_farewell() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![9u8; 10]).unwrap();
        let sender = sender_for(dir.path(), 4, true);

        let (mut client, server) = tokio::io::duplex(4096);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        assert_eq!(read_text(&mut client).await.unwrap(), GREETING_TEXT);
        send_filename(&mut client, "a.bin").await;
        let header = ResponseHeader::read(&mut client).await.unwrap();
        assert!(header.found);
        read_text(&mut client).await.unwrap();
        let descriptor = TransferDescriptor::read(&mut client).await.unwrap();
        assert_eq!(descriptor.chunk_count(), 3);

        let mut payload = vec![0u8; 10];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(read_text(&mut client).await.unwrap(), COMPLETE_TEXT);
        assert_eq!(read_text(&mut client).await.unwrap(), FAREWELL_TEXT);

        match task.await.unwrap().unwrap() {
            SessionOutcome::Transferred(stats) => assert_eq!(stats.total_chunks, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_reset_mid_stream_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![1u8; 256 * 1024]).unwrap();
        let sender = sender_for(dir.path(), 1024, false);

        let (mut client, server) = tokio::io::duplex(2048);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        send_filename(&mut client, "big.bin").await;
        let header = ResponseHeader::read(&mut client).await.unwrap();
        assert!(header.found);
        drop(client);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Io(_))));
        // 성공 카운트는 헤더 전송 시점에 이미 반영됨
        assert_eq!(sender.stats().snapshot().successful_requests, 1);
    }

    #[tokio::test]
    async fn test_source_shrinking_mid_stream_sends_nothing_after_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shrink.bin");
        std::fs::write(&path, pattern_bytes(100)).unwrap();
        // 청크 1 바이트 + 1 바이트 duplex: 송신이 클라이언트 읽기 속도에 묶임
        let sender = sender_for(dir.path(), 1, true);

        let (mut client, server) = tokio::io::duplex(1);
        let task = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.serve(server, peer()).await })
        };

        let mut greeting = Outbox::new();
        greeting.text(GREETING_TEXT).unwrap();
        assert_eq!(read_text(&mut client).await.unwrap(), GREETING_TEXT);
        send_filename(&mut client, "shrink.bin").await;

        let mut head = Outbox::new();
        head.header(&ResponseHeader::new(
            "shrink.bin",
            true,
            &StatsSnapshot {
                total_requests: 1,
                successful_requests: 1,
            },
        ))
        .unwrap()
        .text(&downloading_text("shrink.bin"))
        .unwrap()
        .descriptor(&TransferDescriptor::new(100, 1));
        let mut head_bytes = vec![0u8; head.len()];
        client.read_exact(&mut head_bytes).await.unwrap();

        let mut wire = Vec::new();
        head.send(&mut wire).await.unwrap();
        assert_eq!(head_bytes, wire);

        let mut payload = vec![0u8; 50];
        client.read_exact(&mut payload).await.unwrap();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(90)
            .unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        payload.extend_from_slice(&rest);
        // 남은 원본 바이트만 오고 완료/종료 메시지는 없음
        assert_eq!(payload, pattern_bytes(90));

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::SourceTruncated { expected: 100, sent: 90 })
        ));

        // 같은 바이트를 받은 클라이언트는 파일을 남기지 않음
        let downloads = tempfile::tempdir().unwrap();
        let receiver = crate::Receiver::new(crate::ClientConfig {
            downloads_dir: downloads.path().to_path_buf(),
            announce: true,
            ..crate::ClientConfig::default()
        })
        .unwrap();

        let (replay_client, mut replay_server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            greeting.send(&mut replay_server).await.unwrap();
            read_text(&mut replay_server).await.unwrap();
            replay_server.write_all(&wire).await.unwrap();
            replay_server.write_all(&payload).await.unwrap();
        });

        let replayed = receiver.exchange(replay_client, "shrink.bin").await;
        assert!(matches!(
            replayed,
            Err(Error::Truncated { expected: 100, received: 90 })
        ));
        assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_flag_is_false_byte() {
        let dir = tempfile::tempdir().unwrap();
        let sender = sender_for(dir.path(), 4096, false);

        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { sender.serve(server, peer()).await });

        send_filename(&mut client, "nope").await;
        read_text(&mut client).await.unwrap();
        read_text(&mut client).await.unwrap();
        assert!(!read_bool(&mut client).await.unwrap());
        task.await.unwrap().unwrap();
    }
}

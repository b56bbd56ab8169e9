//! 수신자 (클라이언트측)
//!
//! - 연결 하나로 파일 하나 요청
//! - 청크가 도착하는 대로 `<name>.part` 에 기록, 완료 후 최종 이름으로 변경
//! - 실패 시 부분 파일 삭제 (잘린 파일이 완전한 파일처럼 남지 않음)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use crate::chunk::receive_chunks;
use crate::config::ClientConfig;
use crate::message::{read_text, timed, Outbox, ResponseHeader, TransferDescriptor};
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 부분 파일 확장자
const PART_SUFFIX: &str = ".part";

/// 다운로드 결과
#[derive(Debug)]
pub enum DownloadOutcome {
    /// 서버에 파일 없음. 디스크립터/페이로드를 읽지 않았고 파일도 만들지 않음
    NotFound { header: ResponseHeader },

    /// 완료
    Completed {
        path: PathBuf,
        header: ResponseHeader,
        descriptor: TransferDescriptor,
        stats: TransferStats,
    },
}

impl DownloadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }

    pub fn header(&self) -> &ResponseHeader {
        match self {
            DownloadOutcome::NotFound { header } => header,
            DownloadOutcome::Completed { header, .. } => header,
        }
    }
}

/// 파일 수신 클라이언트
#[derive(Debug, Clone)]
pub struct Receiver {
    config: ClientConfig,
}

impl Receiver {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 서버에 연결해서 파일 하나 다운로드
    ///
    /// 연결 실패는 `Error::Connect` (전송 중 실패와 구분)
    pub async fn download(&self, host: &str, port: u16, filename: &str) -> Result<DownloadOutcome> {
        let stream = connect((host, port), format!("{}:{}", host, port)).await?;
        self.exchange(stream, filename).await
    }

    pub async fn download_from(&self, addr: SocketAddr, filename: &str) -> Result<DownloadOutcome> {
        let stream = connect(addr, addr.to_string()).await?;
        self.exchange(stream, filename).await
    }

    /// 이미 연결된 스트림으로 교환 한 번 수행
    pub async fn exchange<S>(&self, stream: S, filename: &str) -> Result<DownloadOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let destination = self.destination_for(filename)?;

        let (mut reader, mut writer) = tokio::io::split(stream);
        let result = self.run(&mut reader, &mut writer, filename, &destination).await;

        drop(reader);
        if let Err(e) = writer.shutdown().await {
            debug!("소켓 종료 실패 (무시): {}", e);
        }
        result
    }

    /// 저장 경로 (요청 이름의 마지막 구성 요소만 사용)
    pub fn destination_for(&self, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| Error::InvalidFilename(filename.to_string()))?;
        Ok(self.config.downloads_dir.join(name))
    }

    async fn run<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        filename: &str,
        destination: &Path,
    ) -> Result<DownloadOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let read_timeout = self.config.read_timeout;

        if self.config.announce {
            let greeting = timed(read_timeout, read_text(reader)).await?;
            info!("{}", greeting);
        }

        Outbox::new().text(filename)?.send(writer).await?;

        let header = timed(read_timeout, ResponseHeader::read(reader)).await?;
        info!("{}", header.lookup_message);
        info!("{}", header.stats_message);

        if !header.found {
            return Ok(DownloadOutcome::NotFound { header });
        }

        let downloading = timed(read_timeout, read_text(reader)).await?;
        info!("{}", downloading);

        let descriptor = timed(read_timeout, TransferDescriptor::read(reader)).await?;
        info!(
            "File size: {} bytes, chunk size: {} bytes",
            descriptor.file_size, descriptor.chunk_size
        );

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = part_path(destination);

        let stats = match self.receive_into(&part, reader, &descriptor).await {
            Ok(stats) => stats,
            Err(e) => {
                discard(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part, destination).await {
            discard(&part).await;
            return Err(e.into());
        }
        info!("Saved {:?} ({})", destination, stats.summary());

        // 바이트는 모두 받았으므로 완료 메시지 누락은 경고만
        match timed(read_timeout, read_text(reader)).await {
            Ok(complete) => info!("{}", complete),
            Err(e) => warn!("완료 메시지 수신 실패 (파일은 완전함): {}", e),
        }

        if self.config.announce {
            match timed(read_timeout, read_text(reader)).await {
                Ok(farewell) => info!("{}", farewell),
                Err(e) => debug!("종료 메시지 없음: {}", e),
            }
        }

        Ok(DownloadOutcome::Completed {
            path: destination.to_path_buf(),
            header,
            descriptor,
            stats,
        })
    }

    async fn receive_into<R>(
        &self,
        part: &Path,
        reader: &mut R,
        descriptor: &TransferDescriptor,
    ) -> Result<TransferStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = File::create(part).await?;
        let stats = receive_chunks(
            reader,
            &mut file,
            descriptor,
            self.config.max_chunk_size,
            self.config.read_timeout,
        )
        .await?;
        file.sync_all().await?;

        if stats.total_bytes != descriptor.file_size {
            return Err(Error::Truncated {
                expected: descriptor.file_size,
                received: stats.total_bytes,
            });
        }
        Ok(stats)
    }
}

async fn connect<A: ToSocketAddrs>(addr: A, label: String) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| Error::Connect {
            addr: label.clone(),
            source,
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY 설정 실패: {}", e);
    }
    info!("Connected to {}", label);
    Ok(stream)
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// 부분 파일 삭제 (실패는 기록만)
async fn discard(part: &Path) {
    match fs::remove_file(part).await {
        Ok(()) => debug!("부분 파일 삭제: {:?}", part),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("부분 파일 삭제 실패 {:?}: {}", part, e),
    }
}

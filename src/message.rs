//! 프로토콜 메시지 정의 및 와이어 인코딩
//!
//! 모든 정수는 big-endian
//! - 텍스트: u16 길이 + UTF-8 바이트
//! - 불리언: 1 바이트 (0 = false)
//! - 디스크립터: u64 파일 크기 + u32 청크 크기
//!
//! 페이로드 바이트 스트림은 `chunk` 모듈 담당

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::stats::StatsSnapshot;
use crate::{Error, Result};

/// 연결 직후 인사 메시지 (개정 프로토콜)
pub const GREETING_TEXT: &str = "Connection established.";

/// 전송 완료 메시지
pub const COMPLETE_TEXT: &str = "Download complete";

/// 연결 종료 알림 (개정 프로토콜)
pub const FAREWELL_TEXT: &str = "Closing connection...";

/// 텍스트 최대 길이
pub const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// 파일 조회 결과 메시지
pub fn lookup_text(filename: &str, found: bool) -> String {
    if found {
        format!("File {} found at server", filename)
    } else {
        format!("File {} not found at server", filename)
    }
}

/// 서버 통계 메시지
pub fn stats_text(stats: &StatsSnapshot) -> String {
    format!(
        "Server handled {} requests, {} requests were successful",
        stats.total_requests, stats.successful_requests
    )
}

/// 다운로드 시작 메시지
pub fn downloading_text(filename: &str) -> String {
    format!("Downloading file {}", filename)
}

/// 통계 메시지에서 숫자 추출
pub fn parse_stats_text(text: &str) -> Option<StatsSnapshot> {
    let rest = text.strip_prefix("Server handled ")?;
    let (total, rest) = rest.split_once(" requests, ")?;
    let successful = rest.strip_suffix(" requests were successful")?;
    Some(StatsSnapshot {
        total_requests: total.parse().ok()?,
        successful_requests: successful.parse().ok()?,
    })
}

/// 텍스트 인코딩
pub fn encode_text(buf: &mut BytesMut, text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > MAX_TEXT_LEN {
        return Err(Error::TextTooLong { len: bytes.len() });
    }
    buf.reserve(2 + bytes.len());
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

/// 불리언 인코딩
pub fn encode_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(value as u8);
}

/// 텍스트 읽기
pub async fn read_text<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16().await.map_err(eof_as_closed)?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    Ok(String::from_utf8(buf)?)
}

/// 불리언 읽기
pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    let value = reader.read_u8().await.map_err(eof_as_closed)?;
    Ok(value != 0)
}

/// 피어가 닫은 경우 `ConnectionClosed` 로 변환
pub(crate) fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// 선택적 유휴 타임아웃 적용
pub async fn timed<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

/// 전송 디스크립터 (바이트 스트림 직전에 한 번 전송)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// 전체 파일 크기
    pub file_size: u64,

    /// 서버가 정한 청크 크기 (읽기/쓰기 단위 상한)
    pub chunk_size: u32,
}

impl TransferDescriptor {
    /// 와이어 크기 (8 + 4)
    pub const WIRE_LEN: usize = 12;

    pub fn new(file_size: u64, chunk_size: u32) -> Self {
        Self {
            file_size,
            chunk_size,
        }
    }

    /// 예상 청크 수 (마지막 청크는 짧을 수 있음, 빈 청크 없음)
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.file_size.div_ceil(self.chunk_size as u64)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::WIRE_LEN);
        buf.put_u64(self.file_size);
        buf.put_u32(self.chunk_size);
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let file_size = reader.read_u64().await.map_err(eof_as_closed)?;
        let chunk_size = reader.read_u32().await.map_err(eof_as_closed)?;
        Ok(Self::new(file_size, chunk_size))
    }
}

/// 응답 헤더 (조회 결과, 통계, found 플래그)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub found: bool,
    pub lookup_message: String,
    pub stats_message: String,
}

impl ResponseHeader {
    pub fn new(filename: &str, found: bool, stats: &StatsSnapshot) -> Self {
        Self {
            found,
            lookup_message: lookup_text(filename, found),
            stats_message: stats_text(stats),
        }
    }

    /// 메시지에 담긴 서버 통계
    pub fn stats(&self) -> Option<StatsSnapshot> {
        parse_stats_text(&self.stats_message)
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        encode_text(buf, &self.lookup_message)?;
        encode_text(buf, &self.stats_message)?;
        encode_bool(buf, self.found);
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let lookup_message = read_text(reader).await?;
        let stats_message = read_text(reader).await?;
        let found = read_bool(reader).await?;
        Ok(Self {
            found,
            lookup_message,
            stats_message,
        })
    }
}

/// 송신 버퍼
///
/// 여러 메시지를 모아 한 번에 쓰고 flush
#[derive(Debug, Default)]
pub struct Outbox {
    buf: BytesMut,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, text: &str) -> Result<&mut Self> {
        encode_text(&mut self.buf, text)?;
        Ok(self)
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        encode_bool(&mut self.buf, value);
        self
    }

    pub fn header(&mut self, header: &ResponseHeader) -> Result<&mut Self> {
        header.encode(&mut self.buf)?;
        Ok(self)
    }

    pub fn descriptor(&mut self, descriptor: &TransferDescriptor) -> &mut Self {
        descriptor.encode(&mut self.buf);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 모은 메시지 전송 후 버퍼 비움
    pub async fn send<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.buf).await?;
        writer.flush().await?;
        self.buf.clear();
        Ok(())
    }
}

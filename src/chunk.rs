//! 청크 단위 바이트 스트림 전송
//!
//! - 청크 사이 구분자 없음, 디스크립터의 `file_size` 만으로 종료 판단
//! - 송신: 원본을 정확히 `chunk_size` 씩 채워서 쓰고 매 청크마다 flush
//! - 수신: `chunk_size` 이하 단위로 읽고 남은 바이트 수를 넘지 않음

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::message::{timed, TransferDescriptor};
use crate::stats::TransferStats;
use crate::{Error, Result};

/// 원본에서 버퍼를 최대한 채움 (EOF 면 짧게 반환)
async fn fill_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 청크 스트림 송신
///
/// 원본에서 정확히 `file_size` 바이트만 보냄. 원본이 더 길어도 선언 크기에서 멈추고,
/// 더 짧으면 `SourceTruncated`.
pub async fn send_chunks<R, W>(
    source: &mut R,
    sink: &mut W,
    descriptor: &TransferDescriptor,
) -> Result<TransferStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let chunk_size = descriptor.chunk_size as u64;
    if chunk_size == 0 {
        return Err(Error::InvalidChunkSize {
            declared: 0,
            max: u32::MAX,
        });
    }

    let mut stats = TransferStats::new();
    let mut buf = vec![0u8; chunk_size.min(descriptor.file_size) as usize];
    let mut remaining = descriptor.file_size;

    while remaining > 0 {
        let want = chunk_size.min(remaining) as usize;
        let n = fill_chunk(source, &mut buf[..want]).await?;
        if n < want {
            return Err(Error::SourceTruncated {
                expected: descriptor.file_size,
                sent: stats.total_bytes,
            });
        }

        sink.write_all(&buf[..n]).await?;
        sink.flush().await?;

        stats.record_chunk(&buf[..n]);
        remaining -= n as u64;
    }

    let stats = stats.finish();
    debug!(
        "청크 송신 완료: {} bytes, {} chunks",
        stats.total_bytes, stats.total_chunks
    );
    Ok(stats)
}

/// 청크 스트림 수신
///
/// 읽기 버퍼는 `min(chunk_size, max_chunk_size)`. 남은 바이트가 있는데
/// 스트림이 끝나면 `Truncated` (정상 종료가 아님).
pub async fn receive_chunks<R, W>(
    stream: &mut R,
    sink: &mut W,
    descriptor: &TransferDescriptor,
    max_chunk_size: u32,
    read_timeout: Option<Duration>,
) -> Result<TransferStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if descriptor.chunk_size == 0 || descriptor.chunk_size > max_chunk_size {
        return Err(Error::InvalidChunkSize {
            declared: descriptor.chunk_size,
            max: max_chunk_size,
        });
    }

    let mut stats = TransferStats::new();
    let mut buf = vec![0u8; (descriptor.chunk_size as u64).min(descriptor.file_size) as usize];
    let mut remaining = descriptor.file_size;

    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = timed(read_timeout, async {
            stream.read(&mut buf[..want]).await.map_err(Error::from)
        })
        .await?;

        if n == 0 {
            return Err(Error::Truncated {
                expected: descriptor.file_size,
                received: stats.total_bytes,
            });
        }

        sink.write_all(&buf[..n]).await?;
        stats.record_chunk(&buf[..n]);
        remaining -= n as u64;
    }

    sink.flush().await?;

    let stats = stats.finish();
    debug!(
        "청크 수신 완료: {} bytes, {} reads",
        stats.total_bytes, stats.total_chunks
    );
    Ok(stats)
}

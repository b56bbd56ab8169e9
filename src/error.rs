//! 에러 타입 정의

use thiserror::Error;

/// FDL 프로토콜 에러 타입
///
/// 파일 없음은 에러가 아님 (`found = false` 로 전달)
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 핸드쉐이크 이전 연결 실패 (서버 도달 불가)
    #[error("서버 연결 실패: {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("읽기 타임아웃: {0:?} 동안 데이터 없음")]
    Timeout(std::time::Duration),

    #[error("연결 종료")]
    ConnectionClosed,

    /// 수신 도중 스트림 종료 (전송 잘림)
    #[error("전송 잘림: expected {expected} bytes, received {received} bytes")]
    Truncated { expected: u64, received: u64 },

    /// 송신 도중 원본 파일이 예상보다 짧음
    #[error("원본 파일 잘림: expected {expected} bytes, sent {sent} bytes")]
    SourceTruncated { expected: u64, sent: u64 },

    #[error("유효하지 않은 청크 크기: declared {declared}, max {max}")]
    InvalidChunkSize { declared: u32, max: u32 },

    #[error("텍스트 길이 초과: {len} bytes (최대 65535)")]
    TextTooLong { len: usize },

    #[error("유효하지 않은 UTF-8 텍스트")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// 저장 경로로 쓸 수 없는 파일 이름
    #[error("유효하지 않은 파일 이름: {0:?}")]
    InvalidFilename(String),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 피어 연결 끊김으로 볼 수 있는 에러인지
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::Truncated { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

//! FDL 클라이언트 - 파일 다운로드 클라이언트
//!
//! 서버에 파일 하나를 요청해서 `downloads/` 에 저장
//!
//! 사용법:
//!   cargo run --release --bin fdl-client -- <SERVER_ADDRESS> <SERVER_PORT> <FILENAME> [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin fdl-client -- 127.0.0.1 8000 report.txt

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fdl::{ClientConfig, DownloadOutcome, Error, Receiver};

const HELP: &str = r#"FDL Client - 파일 다운로드 클라이언트

서버에서 파일 하나를 받아 downloads/ 디렉터리에 저장

사용법:
  cargo run --release --bin fdl-client -- <SERVER_ADDRESS> <SERVER_PORT> <FILENAME> [OPTIONS]

옵션:
  -d, --downloads <DIR>   저장 디렉터리 (기본: 실행 파일 옆 downloads/)
  -a, --announce          서버 인사/종료 메시지 수신 (개정 서버용)
  --timeout <SECS>        읽기 유휴 타임아웃 (기본: 없음)
  --max-chunk <SIZE>      허용 최대 청크 크기 (기본: 16777216)
  -h, --help              이 도움말 출력

예시:
  cargo run --release --bin fdl-client -- 192.168.0.10 8000 report.txt -d ./out
"#;

/// 클라이언트 실행 인자
struct ClientArgs {
    host: String,
    port: u16,
    filename: String,
    config: ClientConfig,
}

fn default_downloads_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("downloads")))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

fn option_value<'a>(args: &'a [String], i: usize, name: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", name))
}

fn parse_args() -> Result<ClientArgs, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig {
        downloads_dir: default_downloads_dir(),
        ..ClientConfig::default()
    };
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--downloads" | "-d" => {
                config.downloads_dir = PathBuf::from(option_value(&args, i, "--downloads")?);
                i += 1;
            }
            "--announce" | "-a" => {
                config.announce = true;
            }
            "--timeout" => {
                let secs: u64 = option_value(&args, i, "--timeout")?
                    .parse()
                    .map_err(|_| "--timeout 값이 유효하지 않음".to_string())?;
                config.read_timeout = Some(Duration::from_secs(secs));
                i += 1;
            }
            "--max-chunk" => {
                config.max_chunk_size = option_value(&args, i, "--max-chunk")?
                    .parse()
                    .map_err(|_| "--max-chunk 값이 유효하지 않음".to_string())?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let [host, port, filename]: [String; 3] = positional
        .try_into()
        .map_err(|_| "SERVER_ADDRESS SERVER_PORT FILENAME 필요".to_string())?;
    let port = port
        .parse()
        .map_err(|_| format!("포트가 유효하지 않음: {}", port))?;

    Ok(ClientArgs {
        host,
        port,
        filename,
        config,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로깅 설정 실패: {}", e);
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, HELP);
            return ExitCode::from(2);
        }
    };

    let receiver = match Receiver::new(args.config) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match receiver.download(&args.host, args.port, &args.filename).await {
        Ok(DownloadOutcome::Completed { path, stats, .. }) => {
            info!("Downloaded {:?}: {}", path, stats.summary());
            ExitCode::SUCCESS
        }
        Ok(DownloadOutcome::NotFound { .. }) => {
            info!("File {} is not available on the server", args.filename);
            ExitCode::SUCCESS
        }
        Err(e @ Error::Connect { .. }) => {
            error!("서버에 연결할 수 없음: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("다운로드 실패 (연결 끊김 또는 전송 오류): {}", e);
            ExitCode::FAILURE
        }
    }
}

//! FDL 서버 - 파일 다운로드 서버
//!
//! `files/` 디렉터리의 파일을 TCP 로 제공
//! - 고정 워커 풀 + 대기 큐로 동시 세션 수 제한
//! - 청크 단위 전송
//!
//! 사용법:
//!   cargo run --release --bin fdl-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 (포트 8000, 워커 10개)
//!   cargo run --release --bin fdl-server
//!
//!   # 워커 2개 + 포화 시 직접 실행
//!   cargo run --release --bin fdl-server -- --workers 2 --queue 4 --policy caller-runs

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fdl::{AdmissionPolicy, Server, ServerConfig};

const HELP: &str = r#"FDL Server - 파일 다운로드 서버

고정 워커 풀 기반 TCP 파일 서버
- 워커가 모두 바쁘면 큐에서 대기, 큐가 가득 차면 정책에 따라 처리
- 서버가 정한 청크 크기로 전송

사용법:
  cargo run --release --bin fdl-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 IP 주소 (기본: 0.0.0.0)
  -p, --port <PORT>       포트 (기본: 8000)
  -f, --files <DIR>       제공할 파일 디렉터리 (기본: 실행 파일 옆 files/)
  -w, --workers <N>       워커 수 (기본: 10)
  -q, --queue <N>         대기 큐 크기 (기본: 무제한)
  --policy <POLICY>       포화 정책: queue | caller-runs | reject (기본: queue)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 4096)
  -a, --announce          인사/종료 메시지 전송
  --timeout <SECS>        클라이언트 읽기 유휴 타임아웃 (기본: 없음)
  --grace <MS>            종료 시 세션 대기 시간 (기본: 500)
  --legacy                초기 버전 설정 (워커 10개, 무제한 큐)
  --revised               개정 버전 설정 (워커 2개, 인사 메시지, 직접 실행)
  -h, --help              이 도움말 출력

예시:
  # 워커 2개, 큐 4개, 포화 시 거부
  cargo run --release --bin fdl-server -- -w 2 -q 4 --policy reject
"#;

fn default_files_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("files")))
        .unwrap_or_else(|| PathBuf::from("files"))
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    args.get(i + 1)
        .ok_or_else(|| format!("{} 값 필요", name))?
        .parse()
        .map_err(|_| format!("{} 값이 유효하지 않음: {}", name, args[i + 1]))
}

fn parse_args() -> Result<ServerConfig, String> {
    let args: Vec<String> = std::env::args().collect();

    // 프리셋 먼저 적용, 나머지 옵션이 덮어씀
    let mut config = if args.iter().any(|a| a == "--revised") {
        ServerConfig::revised()
    } else {
        ServerConfig::legacy()
    };
    config.files_dir = default_files_dir();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                let ip: IpAddr = parse_value(&args, i, "--bind")?;
                config.bind_addr = SocketAddr::new(ip, config.bind_addr.port());
                i += 1;
            }
            "--port" | "-p" => {
                let port: u16 = parse_value(&args, i, "--port")?;
                config.bind_addr.set_port(port);
                i += 1;
            }
            "--files" | "-f" => {
                config.files_dir = parse_value::<PathBuf>(&args, i, "--files")?;
                i += 1;
            }
            "--workers" | "-w" => {
                config.workers = parse_value(&args, i, "--workers")?;
                i += 1;
            }
            "--queue" | "-q" => {
                config.queue_capacity = Some(parse_value(&args, i, "--queue")?);
                i += 1;
            }
            "--policy" => {
                config.policy = args
                    .get(i + 1)
                    .ok_or("--policy 값 필요")?
                    .parse::<AdmissionPolicy>()
                    .map_err(|e| e.to_string())?;
                i += 1;
            }
            "--chunk-size" => {
                config.chunk_size = parse_value(&args, i, "--chunk-size")?;
                i += 1;
            }
            "--announce" | "-a" => {
                config.announce = true;
            }
            "--timeout" => {
                let secs: u64 = parse_value(&args, i, "--timeout")?;
                config.read_timeout = Some(Duration::from_secs(secs));
                i += 1;
            }
            "--grace" => {
                let ms: u64 = parse_value(&args, i, "--grace")?;
                config.shutdown_grace = Duration::from_millis(ms);
                i += 1;
            }
            "--legacy" | "--revised" => {}
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match parse_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}\n\n{}", e, HELP);
            std::process::exit(2);
        }
    };

    info!("FDL Server starting...");

    let server = Server::bind(config).await?;
    let config = server.config();
    info!(
        "Workers: {}, queue: {:?}, policy: {:?}, announce: {}",
        config.workers,
        config.effective_queue_capacity(),
        config.policy,
        config.announce
    );

    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Ctrl-C 처리 등록 실패: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Err(e) = &result {
        error!("서버 종료: {}", e);
    }
    Ok(result?)
}

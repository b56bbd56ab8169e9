#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fdl::{ClientConfig, Receiver, Server, ServerConfig, ServerMonitor, ServerStats};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// 실행 중인 테스트 서버
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    pub monitor: ServerMonitor,
    pub files: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<fdl::Result<()>>>,
}

impl TestServer {
    pub async fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let files = setup_temp_dir();
        let mut config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            files_dir: files.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let server = Server::bind(config).await.expect("Failed to bind server");
        let addr = server.local_addr().unwrap();
        let stats = server.stats();
        let monitor = server.monitor();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            stats,
            monitor,
            files,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn add_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.files.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// 서버 종료 후 결과 반환
    pub async fn stop(mut self) -> fdl::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let task = self.task.take().expect("server already stopped");
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

pub fn receiver_in(downloads: &Path) -> Receiver {
    Receiver::new(ClientConfig {
        downloads_dir: downloads.to_path_buf(),
        ..ClientConfig::default()
    })
    .expect("valid client config")
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// 조건이 참이 될 때까지 대기
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

//! 연결 수용 제어 (워커 풀)
//!
//! - 고정 개수의 워커 태스크가 하나의 FIFO 큐에서 작업을 꺼내 처리
//! - 큐 수신기는 `tokio::sync::Mutex` 로 공유, 작업 하나는 정확히 한 워커만 처리
//! - 큐가 가득 차면 정책에 따라 직접 실행 또는 거부 (조용한 유실 없음)

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AdmissionPolicy;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Handler<J> = Arc<dyn Fn(J) -> BoxFuture + Send + Sync>;

/// 작업 제출 결과
#[derive(Debug)]
pub enum Admission<J> {
    /// 큐에 들어감 (워커가 처리 예정)
    Queued,

    /// 큐 포화로 제출한 쪽에서 직접 실행함
    RanInline,

    /// 거부됨. 작업은 호출자에게 돌려줌
    Rejected(J),
}

impl<J> Admission<J> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected(_))
    }
}

/// 풀 상태 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    /// 워커 수
    pub capacity: usize,

    /// 처리 중인 작업 수
    pub active: usize,

    /// 큐 대기 작업 수
    pub pending: usize,

    /// 워커가 끝낸 작업 수
    pub completed: usize,

    /// 거부된 작업 수
    pub rejected: usize,

    /// 직접 실행된 작업 수
    pub ran_inline: usize,
}

/// 송신 큐 (유한/무한)
enum QueueTx<J> {
    Bounded(mpsc::Sender<J>),
    Unbounded(mpsc::UnboundedSender<J>),
}

impl<J> Clone for QueueTx<J> {
    fn clone(&self) -> Self {
        match self {
            QueueTx::Bounded(tx) => QueueTx::Bounded(tx.clone()),
            QueueTx::Unbounded(tx) => QueueTx::Unbounded(tx.clone()),
        }
    }
}

/// 수신 큐
enum QueueRx<J> {
    Bounded(mpsc::Receiver<J>),
    Unbounded(mpsc::UnboundedReceiver<J>),
}

impl<J> QueueRx<J> {
    async fn recv(&mut self) -> Option<J> {
        match self {
            QueueRx::Bounded(rx) => rx.recv().await,
            QueueRx::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// 워커 간 공유 카운터
#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    pending: AtomicUsize,
    completed: AtomicUsize,
    rejected: AtomicUsize,
    ran_inline: AtomicUsize,
}

/// 드롭 시 태스크 중단 (워커가 중단되면 실행 중 세션도 함께 중단)
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 작업 하나 실행. 패닉은 해당 작업 안에서 끝남
async fn run_contained(fut: BoxFuture) {
    let mut task = AbortOnDrop(tokio::spawn(fut));
    if let Err(e) = (&mut task.0).await {
        if e.is_panic() {
            warn!("작업 패닉 (워커는 계속 동작): {}", e);
        }
    }
}

/// 워커 풀 (수용 제어기)
pub struct WorkerPool<J: Send + 'static> {
    capacity: usize,
    policy: AdmissionPolicy,
    queue_capacity: Option<usize>,
    queue_tx: Mutex<Option<QueueTx<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    handler: Handler<J>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// 워커 시작
    ///
    /// `queue_capacity` 가 None 이면 무제한 큐. 워커는 연결마다 생성되지 않고
    /// 풀이 종료될 때까지 유지됨.
    pub fn start<F, Fut>(
        workers: usize,
        queue_capacity: Option<usize>,
        policy: AdmissionPolicy,
        handler: F,
    ) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let workers = workers.max(1);
        let handler: Handler<J> = Arc::new(move |job: J| -> BoxFuture { Box::pin(handler(job)) });
        let counters = Arc::new(Counters::default());

        let (queue_tx, queue_rx) = match queue_capacity {
            Some(n) => {
                let (tx, rx) = mpsc::channel(n.max(1));
                (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
            }
        };
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let handles = (0..workers)
            .map(|worker_id| {
                let queue_rx = queue_rx.clone();
                let counters = counters.clone();
                let handler = handler.clone();

                tokio::spawn(async move {
                    loop {
                        // 잠금은 작업 하나를 꺼내는 동안만 유지
                        let job = {
                            let mut rx = queue_rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };

                        counters.pending.fetch_sub(1, Ordering::SeqCst);
                        counters.active.fetch_add(1, Ordering::SeqCst);
                        run_contained(handler(job)).await;
                        counters.active.fetch_sub(1, Ordering::SeqCst);
                        counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    debug!("워커 {} 종료", worker_id);
                })
            })
            .collect();

        info!(
            "Worker pool started: {} workers, queue {}, policy {:?}",
            workers,
            queue_capacity.map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            policy
        );

        Self {
            capacity: workers,
            policy,
            queue_capacity,
            queue_tx: Mutex::new(Some(queue_tx)),
            workers: Mutex::new(handles),
            counters,
            handler,
        }
    }

    /// 작업 제출
    ///
    /// `CallerRuns` 정책에서 큐가 가득 차면 이 호출 안에서 작업이 끝날 때까지 실행함
    pub async fn submit(&self, job: J) -> Admission<J> {
        let Some(queue_tx) = self.queue_tx.lock().clone() else {
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return Admission::Rejected(job);
        };

        // 워커가 먼저 꺼내도 음수가 되지 않도록 전송 전에 증가
        self.counters.pending.fetch_add(1, Ordering::SeqCst);

        let overflow = match queue_tx {
            QueueTx::Unbounded(tx) => match tx.send(job) {
                Ok(()) => return Admission::Queued,
                Err(mpsc::error::SendError(job)) => (job, false),
            },
            QueueTx::Bounded(tx) => match tx.try_send(job) {
                Ok(()) => return Admission::Queued,
                Err(mpsc::error::TrySendError::Full(job)) => (job, true),
                Err(mpsc::error::TrySendError::Closed(job)) => (job, false),
            },
        };

        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        let (job, saturated) = overflow;

        if saturated && self.policy == AdmissionPolicy::CallerRuns {
            debug!("큐 포화: 제출 경로에서 직접 실행");
            self.counters.ran_inline.fetch_add(1, Ordering::SeqCst);
            run_contained((self.handler)(job)).await;
            return Admission::RanInline;
        }

        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        Admission::Rejected(job)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue_capacity
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            capacity: self.capacity,
            active: self.counters.active.load(Ordering::SeqCst),
            pending: self.counters.pending.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            ran_inline: self.counters.ran_inline.load(Ordering::SeqCst),
        }
    }

    /// 풀 종료
    ///
    /// 큐를 닫고 `grace` 동안 남은 작업을 기다림. 시간 초과 시 나머지는 중단.
    /// 모두 정상 종료되면 true
    pub async fn shutdown(&self, grace: Duration) -> bool {
        drop(self.queue_tx.lock().take());

        let handles = std::mem::take(&mut *self.workers.lock());
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let drained = tokio::time::timeout(grace, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("Worker pool drained");
                true
            }
            Err(_) => {
                let snap = self.snapshot();
                warn!(
                    "종료 대기 시간 초과 ({:?}): active={}, pending={} 중단",
                    grace, snap.active, snap.pending
                );
                for handle in abort_handles {
                    handle.abort();
                }
                false
            }
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}

//! 생산자 스레드와 소비자 태스크 사이의 용량 제한 전달 채널
//!
//! 생산자 측 흐름 (이벤트 하나당):
//! 1. `acquire()` - 브리지가 닫혔으면 실패
//! 2. `HandoffPermit::submit()` - 큐에 넣거나 버퍼를 되돌려 줌
//! 3. permit이 drop 되면서 `release` (모든 경로에서 정확히 한 번)
//!
//! 소비자 측은 `recv()`로 꺼내고 `dispatch()`로 핸들러를 호출한다.
//! `close()`와 `dispatch()`는 같은 게이트를 잡으므로 `close()`가 반환된 뒤에는
//! 핸들러가 다시 호출되지 않는다.

use crate::buffer::{BufferLedger, EventBuffer};
use crate::config::{BridgeConfig, SubmitPolicy};
use crate::error::{BridgeError, RejectReason, Result, SubmitError};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

struct QueueState {
    items: VecDeque<EventBuffer>,
    /// acquire 불가, 소비자 중단
    closed: bool,
    /// 생산자 대기 해제. 큐에 남은 이벤트는 아직 전달 가능
    interrupted: bool,
}

/// 진단용 카운터
#[derive(Debug, Default)]
struct BridgeStats {
    accepted: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    dropped_empty: AtomicU64,
    discarded: AtomicU64,
    imbalanced_releases: AtomicU64,
}

impl BridgeStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            dropped_empty: self.dropped_empty.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            imbalanced_releases: self.imbalanced_releases.load(Ordering::Relaxed),
        }
    }
}

/// 브리지 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatsSnapshot {
    /// 큐에 들어간 이벤트
    pub accepted: u64,
    /// 핸들러까지 전달된 이벤트
    pub delivered: u64,
    /// 큐가 가득 차서 버려진 이벤트
    pub dropped_full: u64,
    /// 종료 중이거나 닫힌 뒤 버려진 이벤트
    pub dropped_closed: u64,
    /// 빈 페이로드
    pub dropped_empty: u64,
    /// 큐에 들어갔지만 종료로 전달되지 못한 이벤트
    pub discarded: u64,
    /// 짝이 맞지 않는 release 호출
    pub imbalanced_releases: u64,
}

impl BridgeStatsSnapshot {
    /// 생산자 측에서 버려진 이벤트 합계
    pub fn dropped(&self) -> u64 {
        self.dropped_full + self.dropped_closed + self.dropped_empty
    }
}

/// 용량 제한 전달 채널 + 참조 카운트 가드
pub struct BoundedEventBridge {
    config: BridgeConfig,
    state: Mutex<QueueState>,
    not_full: Condvar,
    readable: Notify,
    in_flight: AtomicUsize,
    dispatch_gate: ReentrantMutex<()>,
    ledger: Arc<BufferLedger>,
    stats: BridgeStats,
}

impl BoundedEventBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let capacity = config.capacity.max(1);
        BoundedEventBridge {
            config: BridgeConfig { capacity, ..config },
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                interrupted: false,
            }),
            not_full: Condvar::new(),
            readable: Notify::new(),
            in_flight: AtomicUsize::new(0),
            dispatch_gate: ReentrantMutex::new(()),
            ledger: Arc::new(BufferLedger::new()),
            stats: BridgeStats::default(),
        }
    }

    /// 이 브리지의 장부에 기록되는 버퍼 생성
    pub fn allocate(&self, payload: impl Into<Bytes>) -> EventBuffer {
        EventBuffer::tracked(payload, self.ledger.clone())
    }

    /// 전달 시도 하나를 표시. 닫힌 브리지에서는 `UseAfterClose`
    pub fn acquire(&self) -> Result<HandoffPermit<'_>> {
        let state = self.state.lock();
        if state.closed {
            BridgeStats::bump(&self.stats.dropped_closed);
            return Err(BridgeError::UseAfterClose);
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        drop(state);

        Ok(HandoffPermit {
            bridge: self,
            released: false,
        })
    }

    fn submit_buffer(&self, buffer: EventBuffer) -> std::result::Result<(), SubmitError> {
        if buffer.is_empty() {
            BridgeStats::bump(&self.stats.dropped_empty);
            trace!("Rejected empty event payload");
            return Err(SubmitError::new(RejectReason::Empty, buffer));
        }

        let mut deadline: Option<Instant> = None;
        let mut state = self.state.lock();

        loop {
            if state.closed || state.interrupted {
                BridgeStats::bump(&self.stats.dropped_closed);
                trace!("Rejected event: bridge is shutting down");
                return Err(SubmitError::new(RejectReason::Closed, buffer));
            }

            if state.items.len() < self.config.capacity {
                state.items.push_back(buffer);
                drop(state);
                BridgeStats::bump(&self.stats.accepted);
                self.readable.notify_one();
                return Ok(());
            }

            match self.config.submit_policy {
                SubmitPolicy::Reject => {
                    BridgeStats::bump(&self.stats.dropped_full);
                    debug!(capacity = self.config.capacity, "Bridge full, dropping event");
                    return Err(SubmitError::new(RejectReason::Full, buffer));
                }
                SubmitPolicy::Block => {
                    self.not_full.wait(&mut state);
                }
                SubmitPolicy::BlockFor(timeout) => {
                    let deadline = *deadline.get_or_insert_with(|| Instant::now() + timeout);
                    if Instant::now() >= deadline {
                        BridgeStats::bump(&self.stats.dropped_full);
                        debug!(
                            capacity = self.config.capacity,
                            "Bridge still full after {:?}, dropping event", timeout
                        );
                        return Err(SubmitError::new(RejectReason::Full, buffer));
                    }
                    self.not_full.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// 가드 카운트 감소. 0 아래로는 절대 내려가지 않는다
    fn release_slot(&self) {
        let result = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if result.is_err() {
            BridgeStats::bump(&self.stats.imbalanced_releases);
            warn!("Bridge release without matching acquire, ignoring");
        }
    }

    /// 대기 중인 생산자를 깨우고 이후 submit을 거부. 큐의 이벤트는 유지
    pub fn interrupt_producers(&self) {
        self.state.lock().interrupted = true;
        self.not_full.notify_all();
    }

    /// 브리지를 영구히 닫는다. 이 호출이 실제로 닫았으면 `true`
    ///
    /// 진행 중인 핸들러 호출이 끝날 때까지 기다린다. 큐는 비우지 않는다.
    pub fn close(&self) -> bool {
        let _gate = self.dispatch_gate.lock();
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.interrupted = true;
        }
        self.not_full.notify_all();
        self.readable.notify_one();
        debug!(in_flight = self.in_flight(), "Bridge closed");
        true
    }

    /// 큐에 남은 이벤트를 모두 해제하고 개수를 반환
    pub fn drain(&self) -> usize {
        let remaining = std::mem::take(&mut self.state.lock().items);
        let count = remaining.len();
        self.stats
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);
        drop(remaining);
        self.not_full.notify_all();
        count
    }

    /// 다음 이벤트를 기다린다. 브리지가 닫히면 `None`
    pub async fn recv(&self) -> Option<EventBuffer> {
        loop {
            let notified = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                let next = state.items.pop_front();
                if let Some(buffer) = next {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(buffer);
                }
            }
            notified.await;
        }
    }

    /// 소비자 측 전달. 닫힌 브리지에서는 핸들러를 호출하지 않는다.
    /// 어느 경우든 버퍼는 여기서 해제된다.
    pub fn dispatch<F>(&self, buffer: EventBuffer, invoke: F) -> bool
    where
        F: FnOnce(&EventBuffer),
    {
        let _gate = self.dispatch_gate.lock();
        let delivered = if self.is_closed() {
            BridgeStats::bump(&self.stats.discarded);
            trace!("Discarding event dequeued during shutdown");
            false
        } else {
            invoke(&buffer);
            BridgeStats::bump(&self.stats.delivered);
            true
        };
        drop(buffer);
        delivered
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 현재 큐에 대기 중인 이벤트 수
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// acquire 되었지만 아직 release 되지 않은 전달 시도 수
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        &self.ledger
    }
}

/// 하나의 전달 시도에 대한 가드. drop 시 release 된다.
#[must_use = "dropping the permit releases it without handing off an event"]
pub struct HandoffPermit<'a> {
    bridge: &'a BoundedEventBridge,
    released: bool,
}

impl HandoffPermit<'_> {
    /// 버퍼를 큐에 넣는다. 거부되면 버퍼가 에러와 함께 돌아온다.
    /// 결과와 관계없이 permit은 여기서 release 된다.
    pub fn submit(self, buffer: EventBuffer) -> std::result::Result<(), SubmitError> {
        self.bridge.submit_buffer(buffer)
    }

    /// 전달 없이 release. 여러 번 호출되어도 카운트는 한 번만 줄어든다
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.bridge.release_slot();
        }
    }
}

impl Drop for HandoffPermit<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn bridge(capacity: usize, policy: SubmitPolicy) -> Arc<BoundedEventBridge> {
        Arc::new(BoundedEventBridge::new(
            BridgeConfig::with_capacity(capacity).submit_policy(policy),
        ))
    }

    fn hand_off(bridge: &BoundedEventBridge, payload: &'static str) -> Option<RejectReason> {
        let buffer = bridge.allocate(payload);
        let permit = match bridge.acquire() {
            Ok(permit) => permit,
            Err(_) => return Some(RejectReason::Closed),
        };
        permit.submit(buffer).err().map(|e| e.reason())
    }

    #[test]
    fn test_guard_balanced_on_accept_and_reject() {
        let bridge = bridge(1, SubmitPolicy::Reject);

        assert_eq!(hand_off(&bridge, "e1"), None);
        assert_eq!(hand_off(&bridge, "e2"), Some(RejectReason::Full));
        assert_eq!(bridge.in_flight(), 0);

        // 거부된 버퍼는 이미 해제됨
        assert_eq!(bridge.ledger().allocated(), 2);
        assert_eq!(bridge.ledger().outstanding(), 1);
    }

    #[test]
    fn test_backpressure_never_exceeds_capacity() {
        let bridge = bridge(2, SubmitPolicy::Reject);
        let rejected = (0..3)
            .filter_map(|_| hand_off(&bridge, "event"))
            .count();

        assert_eq!(rejected, 1);
        assert_eq!(bridge.len(), 2);
        assert_eq!(bridge.stats().dropped_full, 1);
        assert_eq!(bridge.stats().accepted, 2);
    }

    #[test]
    fn test_acquire_after_close() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        assert!(bridge.close());
        assert!(!bridge.close());

        assert!(matches!(bridge.acquire(), Err(BridgeError::UseAfterClose)));
        assert_eq!(hand_off(&bridge, "late"), Some(RejectReason::Closed));
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.ledger().outstanding(), 0);
        assert_eq!(bridge.stats().dropped_closed, 2);
    }

    #[test]
    fn test_guard_balanced_when_producer_panics_holding_permit() {
        let bridge = bridge(4, SubmitPolicy::Reject);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let buffer = bridge.allocate("e1");
            let _permit = bridge.acquire().unwrap();
            assert_eq!(bridge.in_flight(), 1);
            if !buffer.is_empty() {
                panic!("producer failed mid hand-off");
            }
        }));

        assert!(result.is_err());
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.ledger().allocated(), 1);
        assert_eq!(bridge.ledger().outstanding(), 0);
        assert_eq!(bridge.stats().imbalanced_releases, 0);
        assert_eq!(hand_off(&bridge, "e2"), None);
    }

    #[test]
    fn test_permit_release_is_idempotent() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        let permit = bridge.acquire().unwrap();
        assert_eq!(bridge.in_flight(), 1);

        permit.release();
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.stats().imbalanced_releases, 0);
    }

    #[test]
    fn test_unmatched_release_does_not_underflow() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        bridge.release_slot();
        bridge.release_slot();

        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.stats().imbalanced_releases, 2);

        let _permit = bridge.acquire().unwrap();
        assert_eq!(bridge.in_flight(), 1);
    }

    #[test]
    fn test_empty_payload_filtered() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        let permit = bridge.acquire().unwrap();
        let err = permit.submit(bridge.allocate(Bytes::new())).unwrap_err();

        assert_eq!(err.reason(), RejectReason::Empty);
        assert!(bridge.is_empty());
        drop(err);
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_recv_preserves_order() {
        let bridge = bridge(16, SubmitPolicy::Block);
        let producer = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                for i in 0..200u32 {
                    let buffer = bridge.allocate(i.to_string());
                    let permit = bridge.acquire().unwrap();
                    permit.submit(buffer).unwrap();
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 200 {
            let buffer = bridge.recv().await.unwrap();
            bridge.dispatch(buffer, |b| {
                received.push(b.as_str().unwrap().parse::<u32>().unwrap())
            });
        }
        producer.join().unwrap();

        assert_eq!(received, (0..200).collect::<Vec<_>>());
        assert_eq!(bridge.stats().delivered, 200);
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[test]
    fn test_blocked_producer_woken_by_close() {
        let bridge = bridge(1, SubmitPolicy::Block);
        assert_eq!(hand_off(&bridge, "e1"), None);

        let producer = {
            let bridge = bridge.clone();
            thread::spawn(move || hand_off(&bridge, "e2"))
        };

        thread::sleep(Duration::from_millis(50));
        bridge.close();

        assert_eq!(producer.join().unwrap(), Some(RejectReason::Closed));
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.drain(), 1);
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[test]
    fn test_blocked_producer_woken_by_interrupt() {
        let bridge = bridge(1, SubmitPolicy::Block);
        assert_eq!(hand_off(&bridge, "e1"), None);

        let producer = {
            let bridge = bridge.clone();
            thread::spawn(move || hand_off(&bridge, "e2"))
        };

        thread::sleep(Duration::from_millis(50));
        bridge.interrupt_producers();

        assert_eq!(producer.join().unwrap(), Some(RejectReason::Closed));
        // 큐에 들어간 이벤트는 아직 닫히지 않았으므로 남아 있다
        assert_eq!(bridge.len(), 1);
        assert!(!bridge.is_closed());
    }

    #[test]
    fn test_block_for_times_out() {
        let bridge = bridge(1, SubmitPolicy::BlockFor(Duration::from_millis(20)));
        assert_eq!(hand_off(&bridge, "e1"), None);

        let started = Instant::now();
        assert_eq!(hand_off(&bridge, "e2"), Some(RejectReason::Full));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_block_for_succeeds_when_drained() {
        let bridge = bridge(1, SubmitPolicy::BlockFor(Duration::from_secs(5)));
        assert_eq!(hand_off(&bridge, "e1"), None);

        let producer = {
            let bridge = bridge.clone();
            thread::spawn(move || hand_off(&bridge, "e2"))
        };

        let first = bridge.recv().await.unwrap();
        assert_eq!(first.as_bytes(), b"e1");
        assert_eq!(producer.join().unwrap(), None);

        let second = bridge.recv().await.unwrap();
        assert_eq!(second.as_bytes(), b"e2");
    }

    #[test]
    fn test_recv_returns_none_after_close() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        assert_eq!(hand_off(&bridge, "e1"), None);
        bridge.close();

        assert!(tokio_test::block_on(bridge.recv()).is_none());
        assert_eq!(bridge.drain(), 1);
        assert_eq!(bridge.stats().discarded, 1);
    }

    #[test]
    fn test_dispatch_after_close_skips_handler() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        let buffer = bridge.allocate("e1");
        bridge.close();

        let mut called = false;
        assert!(!bridge.dispatch(buffer, |_| called = true));
        assert!(!called);
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[test]
    fn test_close_from_inside_handler() {
        let bridge = bridge(4, SubmitPolicy::Reject);
        let buffer = bridge.allocate("e1");

        let delivered = bridge.dispatch(buffer, |_| {
            assert!(bridge.close());
        });
        assert!(delivered);
        assert!(bridge.is_closed());
    }
}

//! 메모리 기반 복제 엔진
//!
//! 미리 정해진 이벤트 목록을 자체 생산자 스레드에서 순서대로 내보낸다.
//! MySQL 서버 없이 브리지와 연결 수명 주기를 구동할 때 사용한다.

use crate::config::ConnectionConfig;
use crate::engine::{EngineFailure, EngineSession, ReplicationEngine};
use crate::error::RejectReason;
use crate::filter::TableFilter;
use crate::handle::{EventSink, HandOff};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct ScriptedEvent {
    /// `schema.table`. 없으면 필터와 무관하게 내보낸다
    table: Option<String>,
    payload: Bytes,
}

/// 순서대로 보관하는 `emit` 결과 수. 이후 결과는 카운터에만 반영된다
pub const MAX_RECORDED_OUTCOMES: usize = 1024;

/// `emit` 결과별 누적 횟수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub accepted: u64,
    pub dropped_full: u64,
    pub dropped_closed: u64,
    pub dropped_empty: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.accepted + self.dropped_full + self.dropped_closed + self.dropped_empty
    }
}

/// 엔진 동작 기록 (테스트/진단용)
#[derive(Debug, Default)]
struct EngineProbe {
    outcomes: Mutex<Vec<HandOff>>,
    accepted: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    dropped_empty: AtomicU64,
    last_config: Mutex<Option<ConnectionConfig>>,
    sessions_opened: AtomicUsize,
    running_threads: AtomicUsize,
}

impl EngineProbe {
    fn record(&self, outcome: HandOff) {
        let counter = match outcome {
            HandOff::Accepted => &self.accepted,
            HandOff::Dropped(RejectReason::Full) => &self.dropped_full,
            HandOff::Dropped(RejectReason::Closed) => &self.dropped_closed,
            HandOff::Dropped(RejectReason::Empty) => &self.dropped_empty,
        };
        counter.fetch_add(1, Ordering::AcqRel);

        let mut outcomes = self.outcomes.lock();
        if outcomes.len() < MAX_RECORDED_OUTCOMES {
            outcomes.push(outcome);
        }
    }

    fn counts(&self) -> OutcomeCounts {
        OutcomeCounts {
            accepted: self.accepted.load(Ordering::Acquire),
            dropped_full: self.dropped_full.load(Ordering::Acquire),
            dropped_closed: self.dropped_closed.load(Ordering::Acquire),
            dropped_empty: self.dropped_empty.load(Ordering::Acquire),
        }
    }
}

/// 스크립트된 이벤트를 내보내는 엔진
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    events: Vec<ScriptedEvent>,
    interval: Option<Duration>,
    repeat: bool,
    failure: Option<EngineFailure>,
    probe: Arc<EngineProbe>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 테이블에 속한 이벤트 추가 (`schema.table`)
    pub fn event(mut self, table: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        self.events.push(ScriptedEvent {
            table: Some(table.into()),
            payload: payload.into(),
        });
        self
    }

    /// 테이블 정보 없는 이벤트 추가
    pub fn raw_event(mut self, payload: impl Into<Bytes>) -> Self {
        self.events.push(ScriptedEvent {
            table: None,
            payload: payload.into(),
        });
        self
    }

    /// 이벤트 사이 지연
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// 닫힐 때까지 스크립트를 반복
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// `open`이 실패하도록 설정. 메시지가 없으면 알 수 없는 실패
    pub fn failing(mut self, message: Option<&str>) -> Self {
        self.failure = Some(match message {
            Some(msg) => EngineFailure::new(msg),
            None => EngineFailure::unknown(),
        });
        self
    }

    /// 처음 `MAX_RECORDED_OUTCOMES`개의 `emit` 결과 (순서 유지)
    pub fn outcomes(&self) -> Vec<HandOff> {
        self.probe.outcomes.lock().clone()
    }

    /// 전체 `emit` 결과 횟수
    pub fn outcome_counts(&self) -> OutcomeCounts {
        self.probe.counts()
    }

    /// 마지막 `open`에 전달된 설정 사본
    pub fn last_config(&self) -> Option<ConnectionConfig> {
        self.probe.last_config.lock().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.probe.sessions_opened.load(Ordering::Acquire)
    }

    /// 아직 살아 있는 생산자 스레드 수
    pub fn running_threads(&self) -> usize {
        self.probe.running_threads.load(Ordering::Acquire)
    }
}

impl ReplicationEngine for MemoryEngine {
    fn open(
        &self,
        config: ConnectionConfig,
        sink: EventSink,
    ) -> Result<Box<dyn EngineSession>, EngineFailure> {
        if let Some(ref failure) = self.failure {
            return Err(failure.clone());
        }

        let filter = TableFilter::compile(&config.table_regexes[..])?;
        *self.probe.last_config.lock() = Some(config);

        let events: Vec<ScriptedEvent> = self
            .events
            .iter()
            .filter(|e| e.table.as_deref().map_or(true, |t| filter.matches_key(t)))
            .cloned()
            .collect();
        let stop = Arc::new(AtomicBool::new(false));
        let producer = Producer {
            events,
            interval: self.interval,
            repeat: self.repeat,
            stop: stop.clone(),
            sink,
            probe: self.probe.clone(),
        };

        self.probe.running_threads.fetch_add(1, Ordering::AcqRel);
        let thread = thread::Builder::new()
            .name("memory-engine".to_string())
            .spawn(move || producer.run())
            .map_err(|e| {
                self.probe.running_threads.fetch_sub(1, Ordering::AcqRel);
                EngineFailure::new(format!("failed to spawn producer thread: {}", e))
            })?;

        self.probe.sessions_opened.fetch_add(1, Ordering::AcqRel);
        debug!("Memory engine started");
        Ok(Box::new(MemorySession {
            stop,
            thread: Some(thread),
        }))
    }
}

struct Producer {
    events: Vec<ScriptedEvent>,
    interval: Option<Duration>,
    repeat: bool,
    stop: Arc<AtomicBool>,
    sink: EventSink,
    probe: Arc<EngineProbe>,
}

impl Producer {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run(self) {
        'script: loop {
            for event in &self.events {
                if self.stopped() {
                    break 'script;
                }
                self.probe.record(self.sink.emit(event.payload.clone()));
                if let Some(interval) = self.interval {
                    thread::park_timeout(interval);
                }
            }
            if !self.repeat || self.events.is_empty() {
                break;
            }
        }

        // 실제 엔진처럼 닫힐 때까지 세션을 유지
        while !self.stopped() {
            thread::park();
        }
        self.probe.running_threads.fetch_sub(1, Ordering::AcqRel);
    }
}

struct MemorySession {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineSession for MemorySession {
    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                error!("Memory engine producer thread panicked");
            }
        }
    }
}

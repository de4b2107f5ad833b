//! 엔진 세션 핸들과 생산자 측 콜백 어댑터

use crate::bridge::BoundedEventBridge;
use crate::config::ConnectionConfig;
use crate::engine::{EngineSession, ReplicationEngine};
use crate::error::{BridgeError, RejectReason, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `EventSink::emit` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandOff {
    Accepted,
    Dropped(RejectReason),
}

impl HandOff {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HandOff::Accepted)
    }
}

/// 엔진이 이벤트를 넘기는 콜백. 생산자 스레드에서 호출된다
#[derive(Clone)]
pub struct EventSink {
    bridge: Arc<BoundedEventBridge>,
}

impl EventSink {
    pub fn new(bridge: Arc<BoundedEventBridge>) -> Self {
        EventSink { bridge }
    }

    /// 이벤트 하나를 브리지로 넘긴다.
    ///
    /// 큐에 들어가지 못한 버퍼는 여기서 해제되고, 가드는 모든 경로에서 정확히
    /// 한 번 release 된다 (permit drop).
    pub fn emit(&self, payload: impl Into<Bytes>) -> HandOff {
        let buffer = self.bridge.allocate(payload);

        let permit = match self.bridge.acquire() {
            Ok(permit) => permit,
            Err(_) => {
                trace!("Bridge closed, dropping event");
                drop(buffer);
                return HandOff::Dropped(RejectReason::Closed);
            }
        };

        match permit.submit(buffer) {
            Ok(()) => HandOff::Accepted,
            Err(rejected) => {
                let reason = rejected.reason();
                drop(rejected.into_buffer());
                HandOff::Dropped(reason)
            }
        }
    }

    /// 브리지가 아직 이벤트를 받을 수 있는지
    pub fn is_closed(&self) -> bool {
        self.bridge.is_closed()
    }
}

/// 실행 중인 엔진 세션에 대한 소유 핸들
///
/// 유효(세션 실행 중) 또는 무효 둘 중 하나이며, 무효 핸들에 대한 `close`는
/// 아무 일도 하지 않는다.
pub struct ConnectionHandle {
    session: Option<Box<dyn EngineSession>>,
    bridge: Arc<BoundedEventBridge>,
}

impl ConnectionHandle {
    /// 아직 열리지 않은 (무효) 핸들
    pub fn new(bridge: Arc<BoundedEventBridge>) -> Self {
        ConnectionHandle {
            session: None,
            bridge,
        }
    }

    /// 엔진 시작. 설정은 엔진이 소유하도록 복사해서 넘긴다
    pub fn open<E>(&mut self, engine: &E, config: &ConnectionConfig) -> Result<()>
    where
        E: ReplicationEngine + ?Sized,
    {
        if self.session.is_some() {
            return Err(BridgeError::RuntimeError(
                "connection handle is already open".to_string(),
            ));
        }

        let sink = EventSink::new(self.bridge.clone());
        match engine.open(config.clone(), sink) {
            Ok(session) => {
                self.session = Some(session);
                debug!("Replication engine session opened");
                Ok(())
            }
            Err(failure) => {
                let message = failure.into_message();
                warn!("Replication engine failed to start: {}", message);
                Err(BridgeError::EngineStartError(message))
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.session.is_some()
    }

    /// 생산 중단 후 엔진 해제. 여러 번 호출해도 안전하다
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            // 큐가 가득 차서 대기 중인 생산자가 있으면 엔진이 멈출 수 없다
            self.bridge.interrupt_producers();
            session.close();
            session.free();
            debug!("Replication engine session closed");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, SubmitPolicy};
    use crate::engine::EngineFailure;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingEngine {
        fail: Option<Option<String>>,
        closes: Arc<AtomicUsize>,
        frees: Arc<AtomicUsize>,
        sink: Mutex<Option<EventSink>>,
    }

    struct RecordingSession {
        closes: Arc<AtomicUsize>,
        frees: Arc<AtomicUsize>,
    }

    impl EngineSession for RecordingSession {
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn free(self: Box<Self>) {
            assert_eq!(self.closes.load(Ordering::SeqCst), 1);
            self.frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ReplicationEngine for RecordingEngine {
        fn open(
            &self,
            _config: ConnectionConfig,
            sink: EventSink,
        ) -> std::result::Result<Box<dyn EngineSession>, EngineFailure> {
            match &self.fail {
                Some(Some(msg)) => Err(EngineFailure::new(msg.clone())),
                Some(None) => Err(EngineFailure::unknown()),
                None => {
                    *self.sink.lock() = Some(sink);
                    Ok(Box::new(RecordingSession {
                        closes: self.closes.clone(),
                        frees: self.frees.clone(),
                    }))
                }
            }
        }
    }

    fn bridge(capacity: usize) -> Arc<BoundedEventBridge> {
        Arc::new(BoundedEventBridge::new(
            BridgeConfig::with_capacity(capacity).submit_policy(SubmitPolicy::Reject),
        ))
    }

    #[test]
    fn test_emit_branches_release_guard() {
        let bridge = bridge(1);
        let sink = EventSink::new(bridge.clone());

        assert_eq!(sink.emit("e1"), HandOff::Accepted);
        assert_eq!(sink.emit("e2"), HandOff::Dropped(RejectReason::Full));
        assert_eq!(sink.emit(Bytes::new()), HandOff::Dropped(RejectReason::Empty));
        bridge.close();
        assert_eq!(sink.emit("e3"), HandOff::Dropped(RejectReason::Closed));
        assert!(sink.is_closed());

        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(bridge.ledger().allocated(), 4);
        // e1만 큐에 남아 있다
        assert_eq!(bridge.ledger().outstanding(), 1);
        bridge.drain();
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_frees_after_close() {
        let engine = RecordingEngine::default();
        let mut handle = ConnectionHandle::new(bridge(4));
        handle
            .open(&engine, &ConnectionConfig::default())
            .unwrap();
        assert!(handle.is_valid());

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_interrupts_producers() {
        let engine = RecordingEngine::default();
        let bridge = bridge(4);
        let mut handle = ConnectionHandle::new(bridge.clone());
        handle.open(&engine, &ConnectionConfig::default()).unwrap();
        let sink = engine.sink.lock().clone().unwrap();

        handle.close();
        assert_eq!(sink.emit("late"), HandOff::Dropped(RejectReason::Closed));
        assert_eq!(bridge.ledger().outstanding(), 0);
    }

    #[test]
    fn test_close_without_open() {
        let mut handle = ConnectionHandle::new(bridge(4));
        assert!(!handle.is_valid());
        handle.close();
        assert!(!handle.is_valid());
    }

    #[test]
    fn test_open_failure_messages() {
        let engine = RecordingEngine {
            fail: Some(Some("Access denied for user 'root'".to_string())),
            ..Default::default()
        };
        let mut handle = ConnectionHandle::new(bridge(4));
        let err = handle.open(&engine, &ConnectionConfig::default()).unwrap_err();
        assert!(matches!(err, BridgeError::EngineStartError(ref m) if m.contains("Access denied")));
        assert!(!handle.is_valid());

        let engine = RecordingEngine {
            fail: Some(None),
            ..Default::default()
        };
        let err = handle.open(&engine, &ConnectionConfig::default()).unwrap_err();
        assert!(
            matches!(err, BridgeError::EngineStartError(ref m) if m == crate::engine::UNKNOWN_ENGINE_FAILURE)
        );
    }

    #[test]
    fn test_double_open_rejected() {
        let engine = RecordingEngine::default();
        let mut handle = ConnectionHandle::new(bridge(4));
        handle.open(&engine, &ConnectionConfig::default()).unwrap();
        assert!(handle.open(&engine, &ConnectionConfig::default()).is_err());
    }
}

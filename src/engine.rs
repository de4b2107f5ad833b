//! 외부 복제 엔진과의 경계
//!
//! 엔진은 자신의 생산자 스레드에서 이벤트마다 `EventSink::emit`을 한 번씩 호출한다.
//! 재연결/재시도 정책은 엔진의 몫이다.

use crate::config::ConnectionConfig;
use crate::error::BridgeError;
use crate::handle::EventSink;
use std::fmt;

/// 엔진이 메시지를 주지 않았을 때 사용하는 메시지
pub const UNKNOWN_ENGINE_FAILURE: &str = "unknown error in replication engine";

/// 엔진 시작 실패. 메시지는 없을 수도 있다
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    message: Option<String>,
}

impl EngineFailure {
    pub fn new(message: impl Into<String>) -> Self {
        EngineFailure {
            message: Some(message.into()),
        }
    }

    pub fn unknown() -> Self {
        EngineFailure { message: None }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// 사용자에게 보일 메시지. 비어 있으면 일반 메시지로 대체
    pub fn into_message(self) -> String {
        match self.message {
            Some(msg) if !msg.trim().is_empty() => msg,
            _ => UNKNOWN_ENGINE_FAILURE.to_string(),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message().unwrap_or(UNKNOWN_ENGINE_FAILURE))
    }
}

impl From<BridgeError> for EngineFailure {
    fn from(err: BridgeError) -> Self {
        // 이미 시작 실패로 분류된 에러는 메시지만 옮긴다
        match err {
            BridgeError::EngineStartError(msg) => EngineFailure::new(msg),
            other => EngineFailure::new(other.to_string()),
        }
    }
}

/// 복제 엔진 팩토리
pub trait ReplicationEngine {
    /// 엔진을 시작한다. 성공 시 생산자 스레드는 이미 실행 중이어야 하고,
    /// 실패 시 실행 중인 스레드를 남기지 않아야 한다.
    ///
    /// `config`는 엔진이 소유하는 사본이다 (재시작 위치 포함).
    fn open(
        &self,
        config: ConnectionConfig,
        sink: EventSink,
    ) -> Result<Box<dyn EngineSession>, EngineFailure>;
}

/// 실행 중인 엔진 인스턴스
pub trait EngineSession: Send {
    /// 생산자 스레드를 멈추고 끝날 때까지 기다린다.
    /// 반환 후에는 sink 호출이 더 이상 없어야 한다.
    fn close(&mut self);

    /// 중단된 세션의 엔진 측 리소스 해제. `close` 이후에만 호출된다
    fn free(self: Box<Self>) {}
}

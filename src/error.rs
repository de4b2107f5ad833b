//! 브리지 및 복제 엔진 에러 타입

use crate::buffer::EventBuffer;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// 잘못되었거나 누락된 연결 인자. 어떤 리소스도 할당되지 않은 상태에서 발생
    #[error("잘못된 인자: {0}")]
    ArgumentError(String),

    /// 복제 엔진 시작 실패 (인증, 네트워크, 잘못된 테이블 필터 등)
    #[error("복제 엔진 시작 실패: {0}")]
    EngineStartError(String),

    #[error("브리지가 이미 닫혔습니다")]
    UseAfterClose,

    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("프로토콜 에러: {0}")]
    ProtocolError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("런타임 에러: {0}")]
    RuntimeError(String),
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        BridgeError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// `submit` 거부 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 큐가 용량 한도에 도달함
    Full,
    /// 브리지가 닫히는 중이거나 이미 닫힘
    Closed,
    /// 빈 페이로드 (null 이벤트)
    Empty,
}

/// 큐에 들어가지 못한 이벤트. 버퍼 소유권은 호출자에게 되돌아간다.
#[derive(Error, Debug)]
#[error("이벤트 전달 거부: {reason:?}")]
pub struct SubmitError {
    reason: RejectReason,
    buffer: EventBuffer,
}

impl SubmitError {
    pub(crate) fn new(reason: RejectReason, buffer: EventBuffer) -> Self {
        SubmitError { reason, buffer }
    }

    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    pub fn into_buffer(self) -> EventBuffer {
        self.buffer
    }
}

//! 변경 이벤트 버퍼
//!
//! 하나의 `EventBuffer`는 항상 단 하나의 소유자를 가진다. 생산자 스레드에서
//! 생성되어 브리지 큐로 이동(move)하고, 소비자가 처리한 뒤 drop 된다.
//! 큐에 들어가지 못한 버퍼는 생산자 쪽에서 drop 된다.
//! `BufferLedger`는 할당/해제 횟수를 세어 누수나 이중 해제가 없음을 확인한다.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 버퍼 할당/해제 장부
#[derive(Debug, Default)]
pub struct BufferLedger {
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Acquire)
    }

    /// 아직 해제되지 않은 버퍼 수
    pub fn outstanding(&self) -> u64 {
        self.allocated().saturating_sub(self.freed())
    }
}

/// 하나의 변경 이벤트 페이로드
pub struct EventBuffer {
    payload: Bytes,
    ledger: Option<Arc<BufferLedger>>,
}

impl EventBuffer {
    /// 장부에 기록되는 버퍼 생성
    pub fn tracked(payload: impl Into<Bytes>, ledger: Arc<BufferLedger>) -> Self {
        ledger.allocated.fetch_add(1, Ordering::AcqRel);
        EventBuffer {
            payload: payload.into(),
            ledger: Some(ledger),
        }
    }

    pub fn untracked(payload: impl Into<Bytes>) -> Self {
        EventBuffer {
            payload: payload.into(),
            ledger: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// UTF-8 페이로드라면 문자열로 반환
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// JSON 페이로드 역직렬화
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.freed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer")
            .field("len", &self.payload.len())
            .field("tracked", &self.ledger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counts_drop_once() {
        let ledger = Arc::new(BufferLedger::new());
        let buffer = EventBuffer::tracked("e1", ledger.clone());
        assert_eq!(ledger.allocated(), 1);
        assert_eq!(ledger.outstanding(), 1);

        // 소유권 이동은 해제가 아니다
        let moved = buffer;
        assert_eq!(ledger.freed(), 0);

        drop(moved);
        assert_eq!(ledger.freed(), 1);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_payload_accessors() {
        let buffer = EventBuffer::untracked(r#"{"table":"orders"}"#);
        assert_eq!(buffer.as_str(), Some(r#"{"table":"orders"}"#));
        assert_eq!(buffer.len(), 18);

        let value: serde_json::Value = buffer.parse_json().unwrap();
        assert_eq!(value["table"], "orders");
    }

    #[test]
    fn test_non_utf8_payload() {
        let buffer = EventBuffer::untracked(vec![0xff, 0xfe]);
        assert!(buffer.as_str().is_none());
        assert!(!buffer.is_empty());
    }
}

//! Binlog 재시작 위치
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 표현합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binlog 파일은 4 바이트 매직 넘버 다음부터 이벤트가 시작된다
pub const BINLOG_START_POSITION: u32 = 4;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub name: String,
    /// 바이트 위치
    pub position: u32,
}

impl BinlogPosition {
    pub fn new(name: impl Into<String>, position: u32) -> Self {
        BinlogPosition {
            name: name.into(),
            position,
        }
    }

    /// 파일의 첫 이벤트 위치
    pub fn start_of(name: impl Into<String>) -> Self {
        BinlogPosition::new(name, BINLOG_START_POSITION)
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.name.rsplit('.').next().and_then(|s| s.parse().ok())
    }

    /// 다음 이벤트 위치로 이동. 0은 위치 정보가 없는 이벤트(인공 이벤트)라 무시
    pub fn advance_to(&mut self, next_position: u32) {
        if next_position != 0 {
            self.position = next_position;
        }
    }

    /// ROTATE 이벤트로 새 파일로 전환
    pub fn rotate(&mut self, name: impl Into<String>, position: u32) {
        self.name = name.into();
        self.position = position;
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binlog_position_parse() {
        let pos = BinlogPosition::new("mysql-bin.000123", 4096);
        assert_eq!(pos.file_sequence(), Some(123));
        assert_eq!(pos.to_string(), "mysql-bin.000123:4096");
    }

    #[test]
    fn test_advance_and_rotate() {
        let mut pos = BinlogPosition::start_of("mysql-bin.000001");
        pos.advance_to(120);
        pos.advance_to(0);
        assert_eq!(pos.position, 120);

        pos.rotate("mysql-bin.000002", 4);
        assert_eq!(pos, BinlogPosition::new("mysql-bin.000002", 4));
    }

    #[test]
    fn test_position_json_keys() {
        let pos: BinlogPosition =
            serde_json::from_str(r#"{"name":"mysql-bin.000007","position":154}"#).unwrap();
        assert_eq!(pos.name, "mysql-bin.000007");
        assert_eq!(pos.position, 154);
    }
}

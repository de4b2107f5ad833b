//! 연결 및 브리지 설정

use crate::error::{BridgeError, Result};
use crate::offset::BinlogPosition;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::time::Duration;

/// 브리지 큐의 기본 용량 (동시에 대기 가능한 이벤트 수)
pub const DEFAULT_BRIDGE_CAPACITY: usize = 1000;

/// 하나의 스트리밍 세션을 위한 불변 설정
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// `schema.table`에 대해 검사되는 정규식 목록. 비어 있으면 모든 테이블
    #[serde(default)]
    pub table_regexes: Vec<String>,
    /// 이 위치부터 스트리밍 재개. 없으면 서버의 현재 위치
    #[serde(default)]
    pub binlog_position: Option<BinlogPosition>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            table_regexes: Vec::new(),
            binlog_position: None,
        }
    }
}

// 비밀번호가 로그로 새지 않도록 직접 구현
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("table_regexes", &self.table_regexes)
            .field("binlog_position", &self.binlog_position)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_table_regexes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table_regexes = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_binlog_position(mut self, position: BinlogPosition) -> Self {
        self.binlog_position = Some(position);
        self
    }

    /// 타입이 없는 JSON 입력에서 설정 생성
    ///
    /// 필드 누락이나 타입 불일치(예: 숫자가 아닌 port)는 `ArgumentError`가 된다.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: ConnectionConfig = serde_json::from_value(value)
            .map_err(|e| BridgeError::ArgumentError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 환경 변수에서 설정 생성
    ///
    /// `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_TABLES`(쉼표 구분),
    /// `BINLOG_FILE` + `BINLOG_POS`(선택)
    pub fn from_env() -> Result<Self> {
        let defaults = ConnectionConfig::default();

        let port = match env::var("DB_PORT") {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                BridgeError::ArgumentError(format!("DB_PORT is not a valid port: {:?}", raw))
            })?,
            Err(_) => defaults.port,
        };

        let table_regexes = env::var("DB_TABLES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let binlog_position = match env::var("BINLOG_FILE") {
            Ok(name) => {
                let position = match env::var("BINLOG_POS") {
                    Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                        BridgeError::ArgumentError(format!(
                            "BINLOG_POS is not a valid position: {:?}",
                            raw
                        ))
                    })?,
                    Err(_) => crate::offset::BINLOG_START_POSITION,
                };
                Some(BinlogPosition::new(name, position))
            }
            Err(_) => None,
        };

        let config = ConnectionConfig {
            hostname: env::var("DB_HOST").unwrap_or(defaults.hostname),
            port,
            username: env::var("DB_USER").unwrap_or(defaults.username),
            password: env::var("DB_PASSWORD").unwrap_or(defaults.password),
            table_regexes,
            binlog_position,
        };
        config.validate()?;
        Ok(config)
    }

    /// 엔진 시작 전에 검사 가능한 인자 오류 확인
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(BridgeError::ArgumentError("hostname is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::ArgumentError("port must not be 0".to_string()));
        }
        if self.username.is_empty() {
            return Err(BridgeError::ArgumentError("username is empty".to_string()));
        }
        if let Some(idx) = self.table_regexes.iter().position(|p| p.is_empty()) {
            return Err(BridgeError::ArgumentError(format!(
                "table regex #{} is empty",
                idx
            )));
        }
        if let Some(ref pos) = self.binlog_position {
            if pos.name.is_empty() {
                return Err(BridgeError::ArgumentError(
                    "binlog position name is empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// 큐가 가득 찼을 때 생산자의 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// 즉시 거부 (backpressure drop)
    Reject,
    /// 공간이 생기거나 브리지가 닫힐 때까지 대기
    Block,
    /// 최대 주어진 시간만큼 대기 후 거부
    BlockFor(Duration),
}

/// 브리지 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub capacity: usize,
    pub submit_policy: SubmitPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            capacity: DEFAULT_BRIDGE_CAPACITY,
            submit_policy: SubmitPolicy::Reject,
        }
    }
}

impl BridgeConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        BridgeConfig {
            capacity,
            ..Default::default()
        }
    }

    pub fn submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(BridgeError::ArgumentError(
                "bridge capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

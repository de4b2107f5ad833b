//! MySQL binlog 이벤트 브리지
//!
//! 별도 스레드에서 도는 binlog 리더가 만든 이벤트를 용량 제한 큐를 통해
//! 단일 비동기 소비자에게 순서대로 정확히 한 번 전달합니다.
//! 주요 기능:
//! - 용량 제한 핸드오프 큐와 참조 카운트 가드
//! - 연결 수명 주기 (Created → Streaming → Closed)
//! - 재시작 위치 지정
//! - MySQL 복제 프로토콜 엔진과 메모리 엔진

pub mod auth;
pub mod binlog;
pub mod bridge;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod handle;
pub mod logging;
pub mod memory_engine;
pub mod mysql_engine;
pub mod offset;
pub mod protocol;
pub mod rows;
pub mod server;

pub use bridge::{BoundedEventBridge, BridgeStatsSnapshot, HandoffPermit};
pub use buffer::{BufferLedger, EventBuffer};
pub use config::{BridgeConfig, ConnectionConfig, SubmitPolicy};
pub use connection::{Connection, ConnectionState, EventHandler};
pub use engine::{EngineFailure, EngineSession, ReplicationEngine};
pub use error::{BridgeError, RejectReason, Result, SubmitError};
pub use handle::{ConnectionHandle, EventSink, HandOff};
pub use logging::set_logger;
pub use memory_engine::{MemoryEngine, OutcomeCounts};
pub use mysql_engine::{MySqlEngine, RowsEnvelope};
pub use offset::BinlogPosition;
pub use rows::ColumnSchema;

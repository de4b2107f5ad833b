//! MySQL 복제 프로토콜 엔진
//!
//! 전용 생산자 스레드에서 COM_BINLOG_DUMP 스트림을 읽고, 필터를 통과한
//! 행 이벤트마다 JSON 봉투 하나를 `EventSink`로 넘긴다. 봉투에는 테이블
//! 컬럼 정보와 해석된 행 값이 함께 실린다.
//!
//! 스레드 구성:
//! - `binlog-producer` 스레드가 자체 current_thread 런타임을 돌린다
//! - `open`은 접속과 인증이 끝날 때까지 기다렸다가 결과를 돌려준다
//! - `close`는 종료 신호를 보내고 스레드를 join 한다

use crate::auth;
use crate::binlog::{create_binlog_dump_command, BinlogParser, EventType, RowAction, TableMapData};
use crate::config::ConnectionConfig;
use crate::engine::{EngineFailure, EngineSession, ReplicationEngine};
use crate::error::{BridgeError, Result};
use crate::filter::TableFilter;
use crate::handle::EventSink;
use crate::offset::BinlogPosition;
use crate::protocol::{self, AuthSwitchRequest, ErrorPacket, GreetingPacket, PacketChannel};
use crate::rows::{self, ColumnSchema};
use crate::server;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_SERVER_ID: u32 = 1001;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 핸들러에 전달되는 행 이벤트 JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsEnvelope {
    /// 이 이벤트 다음의 재시작 위치
    pub binlog_position: BinlogPosition,
    pub schema: String,
    pub table: String,
    pub action: RowAction,
    pub timestamp: DateTime<Utc>,
    pub server_id: u32,
    pub columns: Vec<ColumnSchema>,
    /// 해석된 행 값. UPDATE 는 before, after 순서로 번갈아 들어간다.
    /// 지원하지 않는 컬럼 타입이 있으면 `None`
    pub rows: Option<Vec<Vec<Value>>>,
    /// 원본 행 이미지 (hex)
    pub rows_image: String,
}

/// MySQL 엔진 설정
#[derive(Debug, Clone)]
pub struct MySqlEngine {
    server_id: u32,
    connect_timeout: Duration,
}

impl Default for MySqlEngine {
    fn default() -> Self {
        MySqlEngine {
            server_id: DEFAULT_SERVER_ID,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl MySqlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 복제 클라이언트로 등록할 server id. 서버의 다른 복제본과 겹치면 안 된다
    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }
}

impl ReplicationEngine for MySqlEngine {
    fn open(
        &self,
        config: ConnectionConfig,
        sink: EventSink,
    ) -> std::result::Result<Box<dyn EngineSession>, EngineFailure> {
        let filter = TableFilter::compile(&config.table_regexes[..])?;
        let engine = self.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("binlog-producer".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineFailure::new(format!(
                            "failed to build producer runtime: {}",
                            e
                        ))));
                        return;
                    }
                };
                runtime.block_on(run_producer(engine, config, filter, sink, ready_tx, shutdown_rx));
            })
            .map_err(|e| EngineFailure::new(format!("failed to spawn producer thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(EngineFailure::new("binlog producer exited during startup")));

        match ready {
            Ok(()) => Ok(Box::new(MySqlSession {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            })),
            Err(failure) => {
                if thread.join().is_err() {
                    error!("Binlog producer thread panicked during startup");
                }
                Err(failure)
            }
        }
    }
}

async fn run_producer(
    engine: MySqlEngine,
    config: ConnectionConfig,
    filter: TableFilter,
    sink: EventSink,
    ready: mpsc::SyncSender<std::result::Result<(), EngineFailure>>,
    shutdown: oneshot::Receiver<()>,
) {
    let mut stream = match BinlogStream::connect(&engine, &config).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    tokio::select! {
        result = stream.run(&filter, &sink) => match result {
            Ok(()) => info!("Binlog stream ended at {}", stream.position()),
            Err(e) => error!("Binlog stream failed at {}: {}", stream.position(), e),
        },
        _ = shutdown => debug!("Binlog producer shutting down at {}", stream.position()),
    }
}

struct MySqlSession {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EngineSession for MySqlSession {
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Binlog producer thread panicked");
            }
        }
    }
}

/// 인증까지 끝난 복제 스트림
struct BinlogStream {
    channel: PacketChannel,
    decoder: EventDecoder,
}

impl BinlogStream {
    async fn connect(engine: &MySqlEngine, config: &ConnectionConfig) -> Result<Self> {
        let position = match config.binlog_position {
            Some(ref position) => position.clone(),
            None => server::current_binlog_position(config, engine.connect_timeout).await?,
        };

        let mut channel =
            PacketChannel::connect(&config.hostname, config.port, Some(engine.connect_timeout))
                .await?;

        let greeting = GreetingPacket::parse(&channel.read_packet().await?)?;
        info!(
            "MySQL server version: {}, thread ID: {}, auth plugin: {}",
            greeting.server_version,
            greeting.thread_id,
            greeting.auth_plugin.as_deref().unwrap_or("unknown")
        );

        let response = auth::create_handshake_response(
            &config.username,
            &config.password,
            None,
            &greeting.scramble,
            greeting.server_collation,
        )?;
        channel.write_packet(&response, 1).await?;
        authenticate(&mut channel, &config.password, greeting.auth_plugin.as_deref()).await?;
        debug!("Authentication successful");

        // 체크섬이 켜진 채로 덤프하면 모든 이벤트 끝에 CRC32가 붙는다
        channel
            .send_query("SET @master_binlog_checksum='NONE'")
            .await
            .map_err(|e| {
                BridgeError::EngineStartError(format!("Failed to disable binlog checksum: {}", e))
            })?;

        let command = create_binlog_dump_command(engine.server_id, &position)?;
        channel.write_packet(&command, 0).await?;
        info!(
            "Sent COM_BINLOG_DUMP: server_id={}, position={}",
            engine.server_id, position
        );

        Ok(BinlogStream {
            channel,
            decoder: EventDecoder::new(position),
        })
    }

    fn position(&self) -> &BinlogPosition {
        &self.decoder.position
    }

    async fn run(&mut self, filter: &TableFilter, sink: &EventSink) -> Result<()> {
        loop {
            let packet = self.channel.read_packet().await?;

            if protocol::is_error_packet(&packet) {
                let err = ErrorPacket::parse(&packet)?;
                return Err(BridgeError::ConnectionError(format!(
                    "Binlog stream error {}: {}",
                    err.code, err.message
                )));
            }
            if protocol::is_eof_packet(&packet) {
                return Ok(());
            }
            if packet.len() <= 1 {
                continue;
            }

            // 첫 바이트는 OK 표시
            if let Some(envelope) = self.decoder.decode(&packet[1..], filter)? {
                let payload = serde_json::to_vec(&envelope)?;
                let outcome = sink.emit(payload);
                if outcome.is_accepted() {
                    trace!(
                        "Forwarded {:?} on {}.{}",
                        envelope.action,
                        envelope.schema,
                        envelope.table
                    );
                } else {
                    debug!(?outcome, "Dropped row event at {}", envelope.binlog_position);
                }
            }
        }
    }
}

/// 핸드셰이크 응답 이후의 인증 교환. `server_plugin`은 greeting 에 실린 기본 플러그인
async fn authenticate(
    channel: &mut PacketChannel,
    password: &str,
    server_plugin: Option<&str>,
) -> Result<()> {
    let reply = channel.read_packet().await?;

    if protocol::is_ok_packet(&reply) {
        return Ok(());
    }
    if protocol::is_error_packet(&reply) {
        let err = ErrorPacket::parse(&reply)?;
        return Err(BridgeError::ConnectionError(format!(
            "Authentication failed: {}",
            err.message
        )));
    }

    if reply.first() == Some(&0xFE) {
        let switch = AuthSwitchRequest::parse(&reply)?;
        if switch.plugin != auth::NATIVE_PASSWORD_PLUGIN {
            return Err(BridgeError::ConnectionError(format!(
                "Unsupported authentication plugin: {}",
                switch.plugin
            )));
        }
        let response = auth::create_auth_response(password, &switch.data);
        channel.write_packet(&response, 3).await?;

        let reply = channel.read_packet().await?;
        if protocol::is_ok_packet(&reply) {
            return Ok(());
        }
        if protocol::is_error_packet(&reply) {
            let err = ErrorPacket::parse(&reply)?;
            return Err(BridgeError::ConnectionError(format!(
                "Authentication failed: {}",
                err.message
            )));
        }
    }

    Err(BridgeError::ConnectionError(format!(
        "Unsupported authentication exchange with server plugin {} (only {} is supported)",
        server_plugin.unwrap_or("unknown"),
        auth::NATIVE_PASSWORD_PLUGIN
    )))
}

/// 위치 추적과 테이블 맵을 유지하며 행 이벤트를 봉투로 바꾼다
struct EventDecoder {
    position: BinlogPosition,
    tables: HashMap<u64, TableMapData>,
}

impl EventDecoder {
    fn new(position: BinlogPosition) -> Self {
        EventDecoder {
            position,
            tables: HashMap::new(),
        }
    }

    fn decode(&mut self, data: &[u8], filter: &TableFilter) -> Result<Option<RowsEnvelope>> {
        let (header, offset) = BinlogParser::parse_header(data)?;
        let body = &data[offset..];

        if header.event_type == EventType::Rotate {
            let rotate = BinlogParser::parse_rotate_event(body)?;
            let position = u32::try_from(rotate.position).map_err(|_| {
                BridgeError::BinlogParseError(format!(
                    "Rotate position {} out of range",
                    rotate.position
                ))
            })?;
            self.position.rotate(rotate.next_binlog_name, position);
            self.tables.clear();
            debug!("Rotated to {}", self.position);
            return Ok(None);
        }

        self.position.advance_to(header.next_pos);

        if header.event_type == EventType::TableMap {
            let table_map = BinlogParser::parse_table_map_event(body)?;
            self.tables.insert(table_map.table_id, table_map);
            return Ok(None);
        }

        let action = match header.event_type.row_action() {
            Some(action) => action,
            None => return Ok(None),
        };
        let rows_header = BinlogParser::parse_rows_header(header.event_type, body)?;
        let table = match self.tables.get(&rows_header.table_id) {
            Some(table) => table,
            None => {
                warn!("Rows event for unknown table id {}", rows_header.table_id);
                return Ok(None);
            }
        };
        if !filter.matches(&table.schema, &table.table) {
            return Ok(None);
        }

        let image = &body[rows_header.body_offset..];
        let rows = match rows::decode_rows(header.event_type, image, table) {
            Ok(rows) => Some(rows),
            Err(e) => {
                debug!("Leaving rows undecoded at {}: {}", self.position, e);
                None
            }
        };

        Ok(Some(RowsEnvelope {
            binlog_position: self.position.clone(),
            schema: table.schema.clone(),
            table: table.table.clone(),
            action,
            timestamp: Utc
                .timestamp_opt(header.timestamp as i64, 0)
                .single()
                .unwrap_or_else(Utc::now),
            server_id: header.server_id,
            columns: rows::column_schema(table),
            rows,
            rows_image: to_hex(image),
        }))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

//! 연결 수명 주기
//!
//! `Created → Streaming → Closed`
//!
//! 종료 순서:
//! 1. 엔진 핸들을 닫아 새 콜백이 시작되지 않게 한다
//! 2. 브리지 가드를 닫아 이후 acquire를 막는다
//! 3. 브리지에 남은 이벤트를 해제한다

use crate::bridge::{BoundedEventBridge, BridgeStatsSnapshot};
use crate::buffer::{BufferLedger, EventBuffer};
use crate::config::{BridgeConfig, ConnectionConfig};
use crate::engine::ReplicationEngine;
use crate::error::{BridgeError, Result};
use crate::handle::ConnectionHandle;
use crate::mysql_engine::MySqlEngine;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 이벤트 하나당 한 번 호출되는 소비자 핸들러
pub trait EventHandler: Send + 'static {
    fn on_event(&mut self, event: &EventBuffer);
}

impl<F> EventHandler for F
where
    F: FnMut(&EventBuffer) + Send + 'static,
{
    fn on_event(&mut self, event: &EventBuffer) {
        self(event)
    }
}

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// 설정 검증 완료, 브리지 미연결
    Created,
    /// 엔진 실행 중, 이벤트 전달 중
    Streaming,
    /// 종료됨 (최종 상태)
    Closed,
}

/// 하나의 binlog 스트리밍 세션
pub struct Connection {
    id: Uuid,
    state: ConnectionState,
    config: ConnectionConfig,
    bridge: Arc<BoundedEventBridge>,
    handle: ConnectionHandle,
    dispatcher: Option<JoinHandle<()>>,
}

impl Connection {
    /// 기본 MySQL 엔진과 기본 브리지 설정으로 연결
    ///
    /// tokio 런타임 안에서 호출해야 한다 (핸들러는 런타임 태스크에서 실행).
    pub fn open<H: EventHandler>(config: ConnectionConfig, handler: H) -> Result<Self> {
        Self::open_with(config, BridgeConfig::default(), &MySqlEngine::default(), handler)
    }

    pub fn open_with<E, H>(
        config: ConnectionConfig,
        bridge_config: BridgeConfig,
        engine: &E,
        handler: H,
    ) -> Result<Self>
    where
        E: ReplicationEngine + ?Sized,
        H: EventHandler,
    {
        // 인자 오류는 브리지나 엔진을 만들기 전에 걸러낸다
        config.validate()?;
        bridge_config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            BridgeError::RuntimeError(format!("Connection must be opened inside a tokio runtime: {}", e))
        })?;

        let mut connection = Connection::created(config, bridge_config);
        connection.start(engine, handler, &runtime)?;
        Ok(connection)
    }

    fn created(config: ConnectionConfig, bridge_config: BridgeConfig) -> Self {
        let bridge = Arc::new(BoundedEventBridge::new(bridge_config));
        let id = Uuid::new_v4();
        debug!(%id, "Connection created");

        Connection {
            id,
            state: ConnectionState::Created,
            config,
            handle: ConnectionHandle::new(bridge.clone()),
            bridge,
            dispatcher: None,
        }
    }

    fn start<E, H>(&mut self, engine: &E, handler: H, runtime: &Handle) -> Result<()>
    where
        E: ReplicationEngine + ?Sized,
        H: EventHandler,
    {
        if let Err(e) = self.handle.open(engine, &self.config) {
            error!(id = %self.id, "Failed to open connection: {}", e);
            self.close();
            return Err(e);
        }

        self.dispatcher = Some(runtime.spawn(run_dispatcher(
            self.id,
            self.bridge.clone(),
            handler,
        )));
        self.state = ConnectionState::Streaming;

        match self.config.binlog_position {
            Some(ref position) => info!(id = %self.id, "Streaming {} from {}", self.config.address(), position),
            None => info!(id = %self.id, "Streaming {} from current position", self.config.address()),
        }
        Ok(())
    }

    /// 연결 종료. 반환 후에는 핸들러가 다시 호출되지 않는다. 여러 번 호출해도 안전
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.handle.close();
        self.bridge.close();
        let discarded = self.bridge.drain();
        // 디스패처는 브리지가 닫힌 것을 보고 스스로 끝난다
        self.dispatcher.take();
        self.state = ConnectionState::Closed;

        info!(
            id = %self.id,
            discarded,
            stats = ?self.bridge.stats(),
            "Connection closed"
        );
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.bridge.stats()
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        self.bridge.ledger()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("address", &self.config.address())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// 소비자 루프: 수락된 순서대로 핸들러를 호출한다
async fn run_dispatcher<H: EventHandler>(
    id: Uuid,
    bridge: Arc<BoundedEventBridge>,
    mut handler: H,
) {
    debug!(%id, "Dispatcher started");
    while let Some(buffer) = bridge.recv().await {
        bridge.dispatch(buffer, |event| handler.on_event(event));
    }
    debug!(%id, "Dispatcher stopped");
}

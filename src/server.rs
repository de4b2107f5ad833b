//! 일반 SQL 연결로 서버 상태를 조회한다

use crate::config::ConnectionConfig;
use crate::error::{BridgeError, Result};
use crate::offset::BinlogPosition;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use std::time::Duration;
use tracing::debug;

/// 8.4 이후 구문, 실패하면 이전 구문으로 재시도
const BINLOG_STATUS_QUERIES: [&str; 2] = ["SHOW BINARY LOG STATUS", "SHOW MASTER STATUS"];

fn build_opts(config: &ConnectionConfig) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(config.hostname.clone())
        .tcp_port(config.port)
        .user(Some(config.username.clone()))
        .pass(Some(config.password.clone()))
        .into()
}

/// 서버의 현재 binlog 파일과 위치. 접속부터 조회까지 `timeout` 안에 끝나야 한다
pub async fn current_binlog_position(
    config: &ConnectionConfig,
    timeout: Duration,
) -> Result<BinlogPosition> {
    let lookup = async {
        let mut conn = Conn::new(build_opts(config)).await.map_err(|e| {
            BridgeError::ConnectionError(format!("Failed to connect to MySQL: {}", e))
        })?;

        let result = query_binlog_status(&mut conn).await;
        if let Err(e) = conn.disconnect().await {
            debug!("Failed to disconnect status connection: {}", e);
        }
        result
    };

    tokio::time::timeout(timeout, lookup).await.map_err(|_| {
        BridgeError::ConnectionError(format!(
            "Timed out querying binlog status on {} after {:?}",
            config.address(),
            timeout
        ))
    })?
}

async fn query_binlog_status(conn: &mut Conn) -> Result<BinlogPosition> {
    let mut last_error = None;

    for query in BINLOG_STATUS_QUERIES {
        match conn.query_first::<Row, _>(query).await {
            Ok(Some(row)) => return position_from_row(&row),
            Ok(None) => {
                return Err(BridgeError::QueryError(
                    "No binlog status available (is binary logging enabled?)".to_string(),
                ))
            }
            Err(e) => {
                debug!("{} failed: {}", query, e);
                last_error = Some(e);
            }
        }
    }

    Err(BridgeError::QueryError(format!(
        "Failed to query binlog status: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn position_from_row(row: &Row) -> Result<BinlogPosition> {
    let file: Option<String> = row.get(0);
    let position: Option<u64> = row.get(1);

    match (file, position) {
        (Some(file), Some(position)) => {
            let position = u32::try_from(position).map_err(|_| {
                BridgeError::QueryError(format!("Binlog position {} out of range", position))
            })?;
            Ok(BinlogPosition::new(file, position))
        }
        _ => Err(BridgeError::QueryError(
            "Unexpected binlog status row".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[tokio::test]
    #[ignore = "requires a running MySQL server (DB_HOST, DB_USER, DB_PASSWORD)"]
    async fn test_current_binlog_position() {
        let config = ConnectionConfig::from_env().unwrap();
        let position = current_binlog_position(&config, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!position.name.is_empty());
        assert!(position.position >= crate::offset::BINLOG_START_POSITION);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = ConnectionConfig::new("127.0.0.1", "root").with_port(1);
        let err = current_binlog_position(&config, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // 접속은 받지만 greeting 을 보내지 않는 서버
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let config = ConnectionConfig::new("127.0.0.1", "root").with_port(port);
        let started = Instant::now();
        let err = current_binlog_position(&config, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(
            matches!(err, BridgeError::ConnectionError(ref msg) if msg.contains("Timed out")),
            "unexpected error: {}",
            err
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        silent.abort();
    }
}

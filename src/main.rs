/// MySQL binlog 브리지 사용 예제
///
/// 환경 변수(DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_TABLES, BINLOG_FILE,
/// BINLOG_POS)로 연결하고 행 이벤트를 로그로 출력한다. Ctrl-C로 종료.
use mysql_binlog_bridge::{Connection, ConnectionConfig, EventBuffer, RowsEnvelope};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ConnectionConfig::from_env()?;
    info!("Starting binlog bridge for {}", config.address());

    let mut connection = Connection::open(config, |event: &EventBuffer| {
        match event.parse_json::<RowsEnvelope>() {
            Ok(envelope) => match envelope.rows {
                Some(ref rows) => info!(
                    "{:?} {}.{} at {}: {}",
                    envelope.action,
                    envelope.schema,
                    envelope.table,
                    envelope.binlog_position,
                    serde_json::to_string(rows).unwrap_or_default()
                ),
                None => info!(
                    "{:?} {}.{} at {} ({} undecoded bytes)",
                    envelope.action,
                    envelope.schema,
                    envelope.table,
                    envelope.binlog_position,
                    envelope.rows_image.len() / 2
                ),
            },
            Err(e) => warn!("Unrecognized event payload: {}", e),
        }
    })?;

    info!(id = %connection.id(), "Listening for change events, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    connection.close();
    info!(stats = ?connection.stats(), "Binlog bridge stopped");

    Ok(())
}

//! MySQL 프로토콜 패킷 처리
//!
//! 복제 스트림에 필요한 최소한의 패킷 입출력과 응답 판별만 다룬다.

use crate::error::{BridgeError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// COM_QUERY 커맨드 바이트
pub const COM_QUERY: u8 = 0x03;

/// MySQL 패킷 채널
pub struct PacketChannel {
    stream: TcpStream,
}

impl PacketChannel {
    /// 새 패킷 채널 생성 (TCP 연결)
    pub async fn connect(hostname: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let connecting = TcpStream::connect(&addr);

        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| {
                    BridgeError::ConnectionError(format!(
                        "Timed out connecting to {} after {:?}",
                        addr, limit
                    ))
                })?,
            None => connecting.await,
        }
        .map_err(|e| BridgeError::ConnectionError(format!("Failed to connect to {}: {}", addr, e)))?;

        stream.set_nodelay(true).ok();
        debug!("Connected to MySQL at {}", addr);

        Ok(PacketChannel { stream })
    }

    /// 패킷 읽기
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        // 패킷 헤더 (3 bytes length + 1 byte sequence)
        let mut len_buf = [0u8; 3];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to read packet length: {}", e)))?;
        let length = u32::from_le_bytes([len_buf[0], len_buf[1], len_buf[2], 0]);

        let _sequence = self
            .stream
            .read_u8()
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to read sequence: {}", e)))?;

        let mut buffer = vec![0u8; length as usize];
        self.stream
            .read_exact(&mut buffer)
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to read packet body: {}", e)))?;

        Ok(buffer)
    }

    /// 패킷 쓰기
    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let mut header = Vec::with_capacity(4);
        WriteBytesExt::write_u24::<LittleEndian>(&mut header, data.len() as u32)?;
        WriteBytesExt::write_u8(&mut header, sequence)?;

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to write header: {}", e)))?;
        self.stream
            .write_all(data)
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to write data: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| BridgeError::IoError(format!("Failed to flush: {}", e)))?;

        Ok(())
    }

    /// 쿼리를 보내고 첫 응답 패킷이 에러가 아닌지 확인
    pub async fn send_query(&mut self, sql: &str) -> Result<()> {
        let mut command = Vec::with_capacity(sql.len() + 1);
        command.push(COM_QUERY);
        command.extend_from_slice(sql.as_bytes());
        self.write_packet(&command, 0).await?;

        let response = self.read_packet().await?;
        if is_error_packet(&response) {
            let err = ErrorPacket::parse(&response)?;
            return Err(BridgeError::QueryError(format!("{} ({})", err.message, sql)));
        }
        // 결과셋이면 EOF까지 버린다
        if !is_ok_packet(&response) {
            let mut eofs = 0;
            while eofs < 2 {
                let packet = self.read_packet().await?;
                if is_error_packet(&packet) {
                    let err = ErrorPacket::parse(&packet)?;
                    return Err(BridgeError::QueryError(err.message));
                }
                if is_eof_packet(&packet) {
                    eofs += 1;
                }
            }
        }
        Ok(())
    }
}

/// Greeting 패킷
#[derive(Debug, Clone)]
pub struct GreetingPacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
    pub auth_plugin: Option<String>,
}

impl GreetingPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let protocol_version =
            ReadBytesExt::read_u8(&mut cursor).map_err(protocol_err("protocol version"))?;
        let server_version = read_null_terminated_string(&mut cursor)?;
        let thread_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(protocol_err("thread ID"))?;

        // Auth plugin data part 1 (8 bytes)
        let mut scramble = vec![0u8; 8];
        Read::read_exact(&mut cursor, &mut scramble).map_err(protocol_err("scramble part 1"))?;

        // Filler
        ReadBytesExt::read_u8(&mut cursor).map_err(protocol_err("filler"))?;

        let capabilities_lower = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(protocol_err("capabilities"))?;
        let server_collation =
            ReadBytesExt::read_u8(&mut cursor).map_err(protocol_err("collation"))?;
        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(protocol_err("status"))?;
        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(protocol_err("capabilities upper"))?;
        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        let auth_data_len =
            ReadBytesExt::read_u8(&mut cursor).map_err(protocol_err("auth data length"))?;

        // Reserved (10 bytes)
        let mut reserved = [0u8; 10];
        Read::read_exact(&mut cursor, &mut reserved).map_err(protocol_err("reserved"))?;

        // Auth plugin data part 2 (최소 13 bytes, 마지막 null 포함)
        let scramble_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; scramble_len];
        Read::read_exact(&mut cursor, &mut scramble_part2)
            .map_err(protocol_err("scramble part 2"))?;
        scramble.extend_from_slice(&scramble_part2[..scramble_part2.len() - 1]);

        let auth_plugin = if (cursor.position() as usize) < data.len() {
            Some(read_null_terminated_string(&mut cursor)?)
        } else {
            None
        };

        Ok(GreetingPacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
            auth_plugin,
        })
    }
}

/// ERR 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: u16,
    pub message: String,
}

impl ErrorPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if !is_error_packet(data) || data.len() < 3 {
            return Err(BridgeError::ProtocolError("Not an error packet".to_string()));
        }
        let code = u16::from_le_bytes([data[1], data[2]]);
        let mut rest = &data[3..];
        // '#' + 5 bytes SQL state
        if rest.first() == Some(&b'#') && rest.len() >= 6 {
            rest = &rest[6..];
        }
        Ok(ErrorPacket {
            code,
            message: String::from_utf8_lossy(rest).to_string(),
        })
    }
}

/// 인증 방식 변경 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&0xFE) {
            return Err(BridgeError::ProtocolError(
                "Not an auth switch request".to_string(),
            ));
        }
        let mut cursor = Cursor::new(&data[1..]);
        let plugin = read_null_terminated_string(&mut cursor)?;
        let mut rest = data[1 + cursor.position() as usize..].to_vec();
        // 스크램블 끝의 null
        if rest.last() == Some(&0) {
            rest.pop();
        }
        Ok(AuthSwitchRequest { plugin, data: rest })
    }
}

fn protocol_err(field: &'static str) -> impl Fn(std::io::Error) -> BridgeError {
    move |e| BridgeError::ProtocolError(format!("Failed to read {}: {}", field, e))
}

/// null로 끝나는 문자열 읽기
pub(crate) fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = ReadBytesExt::read_u8(reader).map_err(protocol_err("string byte"))?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes)
        .map_err(|e| BridgeError::ProtocolError(format!("Invalid UTF-8 in string: {}", e)))
}

/// Error 패킷 확인
pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

/// OK 패킷 확인
pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

/// EOF 패킷 확인
pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}

//! MySQL binlog 이벤트 파싱
//!
//! 각 이벤트 헤더 (19 bytes):
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Next Position (4 bytes)
//!   - Flags (2 bytes)
//!
//! TABLE_MAP 이벤트에서는 컬럼 타입, 메타데이터, null 허용 여부와
//! (binlog_row_metadata=FULL 인 경우) 컬럼 이름/부호 정보를 읽는다.
//! 행 이미지 해석은 `rows` 모듈이 맡는다.

use crate::error::{BridgeError, Result};
use crate::offset::BinlogPosition;
use crate::rows::column_type;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read};

pub const EVENT_HEADER_SIZE: usize = 19;

/// COM_BINLOG_DUMP 커맨드 바이트
pub const COM_BINLOG_DUMP: u8 = 0x12;

/// TABLE_MAP optional metadata 필드 타입
const OPTIONAL_META_SIGNEDNESS: u8 = 1;
const OPTIONAL_META_COLUMN_NAME: u8 = 4;

/// MySQL binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Unknown,
    Query,
    Rotate,
    FormatDescription,
    Xid,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Heartbeat,
    WriteRows,
    UpdateRows,
    DeleteRows,
    Gtid,
    AnonymousGtid,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::Query,
            4 => EventType::Rotate,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            27 => EventType::Heartbeat,
            30 => EventType::WriteRows,
            31 => EventType::UpdateRows,
            32 => EventType::DeleteRows,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            _ => EventType::Unknown,
        }
    }

    pub fn is_rows_event(&self) -> bool {
        self.row_action().is_some()
    }

    /// v2 행 이벤트는 헤더 뒤에 가변 길이 extra data가 붙는다
    fn has_extra_data(&self) -> bool {
        matches!(
            self,
            EventType::WriteRows | EventType::UpdateRows | EventType::DeleteRows
        )
    }

    pub fn row_action(&self) -> Option<RowAction> {
        match self {
            EventType::WriteRows | EventType::WriteRowsV1 => Some(RowAction::Insert),
            EventType::UpdateRows | EventType::UpdateRowsV1 => Some(RowAction::Update),
            EventType::DeleteRows | EventType::DeleteRowsV1 => Some(RowAction::Delete),
            _ => None,
        }
    }
}

/// 행 변경 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Insert,
    Update,
    Delete,
}

/// binlog 이벤트 헤더
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    pub event_type: EventType,
    pub server_id: u32,
    /// 이벤트 길이 (헤더 포함)
    pub event_length: u32,
    /// 다음 이벤트 위치. 가상 이벤트면 0
    pub next_pos: u32,
    pub flags: u16,
}

/// TABLE_MAP 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapData {
    pub table_id: u64,
    pub schema: String,
    pub table: String,
    /// 컬럼별 `column_type` 값
    pub column_types: Vec<u8>,
    /// 컬럼별 타입 메타데이터 (길이, 정밀도, fsp 등)
    pub column_meta: Vec<u16>,
    pub null_bitmap: Vec<u8>,
    /// optional metadata가 없으면 비어 있다
    pub column_names: Vec<String>,
    /// optional metadata가 없으면 비어 있다 (모두 signed로 취급)
    pub unsigned: Vec<bool>,
}

impl TableMapData {
    /// 필터에 쓰는 `schema.table` 키
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn is_nullable(&self, column: usize) -> bool {
        bit_is_set(&self.null_bitmap, column)
    }

    pub fn is_unsigned(&self, column: usize) -> bool {
        self.unsigned.get(column).copied().unwrap_or(false)
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.column_names.get(column).map(String::as_str)
    }
}

/// ROTATE 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEventData {
    pub next_binlog_name: String,
    pub position: u64,
}

/// 행 이벤트 고정 헤더. `body_offset` 이후가 행 이미지다
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsEventHeader {
    pub table_id: u64,
    pub flags: u16,
    pub body_offset: usize,
}

/// binlog 이벤트 파서
pub struct BinlogParser;

impl BinlogParser {
    /// 이벤트 헤더 파싱. 헤더 뒤 본문의 시작 오프셋도 반환
    pub fn parse_header(data: &[u8]) -> Result<(EventHeader, usize)> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(BridgeError::BinlogParseError(
                "Invalid event header: too short".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_type = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        Ok((
            EventHeader {
                timestamp,
                event_type: EventType::from_u8(event_type),
                server_id,
                event_length,
                next_pos,
                flags,
            },
            cursor.position() as usize,
        ))
    }

    /// TABLE_MAP 이벤트 파싱 (19)
    ///
    /// 본문 구성:
    ///   - table id (6 bytes), flags (2 bytes)
    ///   - schema, table 이름 (1 byte 길이 + 이름 + null)
    ///   - 컬럼 수 (lenenc), 컬럼 타입 (컬럼당 1 byte)
    ///   - 메타데이터 블록 (lenenc 길이 + 타입별 0-2 bytes)
    ///   - null bitmap, 이어서 선택적 TLV 메타데이터
    pub fn parse_table_map_event(data: &[u8]) -> Result<TableMapData> {
        let mut cursor = Cursor::new(data);
        let err = parse_err("table map");

        let table_id = cursor.read_u48::<LittleEndian>().map_err(&err)?;
        let _flags = cursor.read_u16::<LittleEndian>().map_err(&err)?;

        let schema = read_length_prefixed_name(&mut cursor)?;
        let table = read_length_prefixed_name(&mut cursor)?;

        let column_count = read_lenenc_int(&mut cursor).map_err(&err)? as usize;
        let column_types = read_bytes(&mut cursor, column_count).map_err(&err)?;

        let meta_len = read_lenenc_int(&mut cursor).map_err(&err)? as usize;
        let meta_block = read_bytes(&mut cursor, meta_len).map_err(&err)?;
        let column_meta = parse_column_meta(&column_types, &meta_block)?;

        let null_bitmap = read_bytes(&mut cursor, (column_count + 7) / 8).map_err(&err)?;

        let mut table_map = TableMapData {
            table_id,
            schema,
            table,
            column_types,
            column_meta,
            null_bitmap,
            column_names: Vec::new(),
            unsigned: Vec::new(),
        };
        parse_optional_meta(&mut cursor, &mut table_map)?;

        Ok(table_map)
    }

    /// 행 이벤트 헤더 파싱 (23-25, 30-32)
    pub fn parse_rows_header(event_type: EventType, data: &[u8]) -> Result<RowsEventHeader> {
        if !event_type.is_rows_event() {
            return Err(BridgeError::BinlogParseError(format!(
                "{:?} is not a rows event",
                event_type
            )));
        }

        let mut cursor = Cursor::new(data);
        let table_id = cursor
            .read_u48::<LittleEndian>()
            .map_err(parse_err("rows event"))?;
        let flags = cursor.read_u16::<LittleEndian>().map_err(parse_err("rows event"))?;

        if event_type.has_extra_data() {
            // 길이에는 자기 자신 2 bytes가 포함된다
            let extra_len = cursor.read_u16::<LittleEndian>().map_err(parse_err("rows event"))?;
            let skip = (extra_len as u64).saturating_sub(2);
            if cursor.position() + skip > data.len() as u64 {
                return Err(BridgeError::BinlogParseError(
                    "Invalid rows event: extra data overruns event".to_string(),
                ));
            }
            cursor.set_position(cursor.position() + skip);
        }

        Ok(RowsEventHeader {
            table_id,
            flags,
            body_offset: cursor.position() as usize,
        })
    }

    /// ROTATE 이벤트 파싱 (4)
    pub fn parse_rotate_event(data: &[u8]) -> Result<RotateEventData> {
        if data.len() < 8 {
            return Err(BridgeError::BinlogParseError(
                "Invalid rotate event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let position = cursor.read_u64::<LittleEndian>()?;
        let filename = String::from_utf8_lossy(&data[8..]).to_string();

        Ok(RotateEventData {
            next_binlog_name: filename,
            position,
        })
    }
}

/// COM_BINLOG_DUMP 커맨드 생성
pub fn create_binlog_dump_command(
    server_id: u32,
    position: &BinlogPosition,
) -> std::result::Result<Vec<u8>, std::io::Error> {
    let mut command = Vec::with_capacity(11 + position.name.len());
    command.write_u8(COM_BINLOG_DUMP)?;
    command.write_u32::<LittleEndian>(position.position)?;
    // flags
    command.write_u16::<LittleEndian>(0)?;
    command.write_u32::<LittleEndian>(server_id)?;
    command.extend_from_slice(position.name.as_bytes());
    Ok(command)
}

fn parse_err(what: &'static str) -> impl Fn(std::io::Error) -> BridgeError {
    move |e| BridgeError::BinlogParseError(format!("Invalid {} event: {}", what, e))
}

/// 1 byte 길이 + 이름 + null
fn read_length_prefixed_name(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u8().map_err(parse_err("table map"))? as usize;
    let bytes = read_bytes(cursor, len).map_err(parse_err("table map"))?;
    let _nul = cursor.read_u8().map_err(parse_err("table map"))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// length-encoded integer
pub(crate) fn read_lenenc_int(cursor: &mut Cursor<&[u8]>) -> io::Result<u64> {
    match cursor.read_u8()? {
        0xFC => cursor.read_u16::<LittleEndian>().map(u64::from),
        0xFD => cursor.read_u24::<LittleEndian>().map(u64::from),
        0xFE => cursor.read_u64::<LittleEndian>(),
        0xFB | 0xFF => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid length-encoded integer",
        )),
        n => Ok(n as u64),
    }
}

/// 남은 길이를 넘는 요청은 할당 없이 실패한다
pub(crate) fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> io::Result<Vec<u8>> {
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("need {} bytes, {} left", len, remaining),
        ));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// LSB 우선 비트맵
pub(crate) fn bit_is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map_or(false, |byte| byte & (1 << (index % 8)) != 0)
}

fn parse_column_meta(column_types: &[u8], block: &[u8]) -> Result<Vec<u16>> {
    let mut cursor = Cursor::new(block);
    let err = parse_err("table map metadata");

    let mut meta = Vec::with_capacity(column_types.len());
    for &ty in column_types {
        let value = match ty {
            column_type::FLOAT
            | column_type::DOUBLE
            | column_type::BLOB
            | column_type::TINY_BLOB
            | column_type::MEDIUM_BLOB
            | column_type::LONG_BLOB
            | column_type::JSON
            | column_type::GEOMETRY
            | column_type::TIMESTAMP2
            | column_type::DATETIME2
            | column_type::TIME2 => cursor.read_u8().map(u16::from).map_err(&err)?,
            column_type::VARCHAR | column_type::VAR_STRING | column_type::BIT => {
                cursor.read_u16::<LittleEndian>().map_err(&err)?
            }
            column_type::STRING
            | column_type::ENUM
            | column_type::SET
            | column_type::NEWDECIMAL => cursor.read_u16::<BigEndian>().map_err(&err)?,
            _ => 0,
        };
        meta.push(value);
    }

    if cursor.position() as usize != block.len() {
        return Err(BridgeError::BinlogParseError(format!(
            "Invalid table map event: metadata block has {} bytes, consumed {}",
            block.len(),
            cursor.position()
        )));
    }
    Ok(meta)
}

fn parse_optional_meta(cursor: &mut Cursor<&[u8]>, table_map: &mut TableMapData) -> Result<()> {
    let err = parse_err("table map optional metadata");
    let end = cursor.get_ref().len() as u64;

    while cursor.position() < end {
        let kind = cursor.read_u8().map_err(&err)?;
        let len = read_lenenc_int(cursor).map_err(&err)? as usize;
        let value = read_bytes(cursor, len).map_err(&err)?;

        match kind {
            OPTIONAL_META_SIGNEDNESS => {
                // 숫자 컬럼에만 비트가 있고 MSB 우선이다
                let mut numeric = 0usize;
                table_map.unsigned = table_map
                    .column_types
                    .iter()
                    .map(|&ty| {
                        if !column_type::is_numeric(ty) {
                            return false;
                        }
                        let bit = numeric;
                        numeric += 1;
                        value
                            .get(bit / 8)
                            .map_or(false, |byte| byte & (0x80 >> (bit % 8)) != 0)
                    })
                    .collect();
            }
            OPTIONAL_META_COLUMN_NAME => {
                let mut names = Cursor::new(&value[..]);
                let mut column_names = Vec::with_capacity(table_map.column_count());
                while (names.position() as usize) < value.len() {
                    let len = read_lenenc_int(&mut names).map_err(&err)? as usize;
                    let name = read_bytes(&mut names, len).map_err(&err)?;
                    column_names.push(String::from_utf8_lossy(&name).to_string());
                }
                table_map.column_names = column_names;
            }
            _ => {}
        }
    }
    Ok(())
}

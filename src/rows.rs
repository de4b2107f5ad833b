//! 행 이미지 해석
//!
//! TABLE_MAP 의 컬럼 타입과 메타데이터로 WRITE/UPDATE/DELETE_ROWS 본문을
//! JSON 값 행렬로 바꾼다. UPDATE 는 before, after 행이 번갈아 들어간다.
//!
//! 값 표현:
//!   - 정수, 실수 → 숫자
//!   - 문자열, BLOB → UTF-8 이면 문자열, 아니면 `0x` 로 시작하는 hex
//!   - DECIMAL, 날짜/시간 → 문자열 (MySQL 출력 형식)
//!   - ENUM, SET, BIT → 정수 (인덱스 또는 비트값)

use crate::binlog::{bit_is_set, read_bytes, read_lenenc_int, EventType, TableMapData};
use crate::error::{BridgeError, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Cursor};

/// MySQL 컬럼 타입 코드
pub mod column_type {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const TIMESTAMP2: u8 = 17;
    pub const DATETIME2: u8 = 18;
    pub const TIME2: u8 = 19;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const TINY_BLOB: u8 = 249;
    pub const MEDIUM_BLOB: u8 = 250;
    pub const LONG_BLOB: u8 = 251;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;

    /// signedness 메타데이터 비트를 갖는 타입
    pub fn is_numeric(ty: u8) -> bool {
        matches!(
            ty,
            TINY | SHORT | INT24 | LONG | LONGLONG | FLOAT | DOUBLE | DECIMAL | NEWDECIMAL
        )
    }

    pub fn name(ty: u8) -> &'static str {
        match ty {
            DECIMAL => "decimal",
            TINY => "tinyint",
            SHORT => "smallint",
            LONG => "int",
            FLOAT => "float",
            DOUBLE => "double",
            NULL => "null",
            TIMESTAMP | TIMESTAMP2 => "timestamp",
            LONGLONG => "bigint",
            INT24 => "mediumint",
            DATE => "date",
            TIME | TIME2 => "time",
            DATETIME | DATETIME2 => "datetime",
            YEAR => "year",
            VARCHAR | VAR_STRING => "varchar",
            BIT => "bit",
            JSON => "json",
            NEWDECIMAL => "decimal",
            ENUM => "enum",
            SET => "set",
            TINY_BLOB | MEDIUM_BLOB | LONG_BLOB | BLOB => "blob",
            STRING => "char",
            GEOMETRY => "geometry",
            _ => "unknown",
        }
    }
}

/// 봉투에 실리는 컬럼 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    /// binlog_row_metadata=FULL 일 때만 알 수 있다
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    pub unsigned: bool,
}

/// TABLE_MAP 의 컬럼 정보를 봉투용으로 변환
pub fn column_schema(table: &TableMapData) -> Vec<ColumnSchema> {
    (0..table.column_count())
        .map(|i| ColumnSchema {
            name: table.column_name(i).map(str::to_string),
            column_type: column_type::name(table.column_types[i]).to_string(),
            nullable: table.is_nullable(i),
            unsigned: table.is_unsigned(i),
        })
        .collect()
}

/// 행 이벤트 본문 (`RowsEventHeader::body_offset` 이후)을 행 목록으로 해석
pub fn decode_rows(
    event_type: EventType,
    body: &[u8],
    table: &TableMapData,
) -> Result<Vec<Vec<Value>>> {
    let mut cursor = Cursor::new(body);
    let err = row_err(table);

    let column_count = read_lenenc_int(&mut cursor).map_err(&err)? as usize;
    if column_count != table.column_count() {
        return Err(BridgeError::BinlogParseError(format!(
            "Rows event for {} has {} columns, table map has {}",
            table.key(),
            column_count,
            table.column_count()
        )));
    }

    let bitmap_len = (column_count + 7) / 8;
    let present = read_bytes(&mut cursor, bitmap_len).map_err(&err)?;
    let present_after = if matches!(event_type, EventType::UpdateRows | EventType::UpdateRowsV1) {
        Some(read_bytes(&mut cursor, bitmap_len).map_err(&err)?)
    } else {
        None
    };

    let mut rows = Vec::new();
    while (cursor.position() as usize) < body.len() {
        rows.push(read_row(&mut cursor, table, &present)?);
        if let Some(ref after) = present_after {
            rows.push(read_row(&mut cursor, table, after)?);
        }
    }
    Ok(rows)
}

fn row_err(table: &TableMapData) -> impl Fn(io::Error) -> BridgeError + '_ {
    move |e| BridgeError::BinlogParseError(format!("Invalid rows event for {}: {}", table.key(), e))
}

fn read_row(
    cursor: &mut Cursor<&[u8]>,
    table: &TableMapData,
    present: &[u8],
) -> Result<Vec<Value>> {
    let err = row_err(table);
    let present_count = (0..table.column_count())
        .filter(|&i| bit_is_set(present, i))
        .count();
    let nulls = read_bytes(cursor, (present_count + 7) / 8).map_err(&err)?;

    let mut row = Vec::with_capacity(table.column_count());
    let mut present_index = 0;
    for column in 0..table.column_count() {
        if !bit_is_set(present, column) {
            row.push(Value::Null);
            continue;
        }
        let is_null = bit_is_set(&nulls, present_index);
        present_index += 1;
        if is_null {
            row.push(Value::Null);
            continue;
        }

        let ty = table.column_types[column];
        let meta = table.column_meta[column];
        let value = read_value(cursor, ty, meta, table.is_unsigned(column))
            .map_err(&err)?
            .ok_or_else(|| {
                BridgeError::BinlogParseError(format!(
                    "Unsupported column type {} in {}",
                    ty,
                    table.key()
                ))
            })?;
        row.push(value);
    }
    Ok(row)
}

/// 지원하지 않는 타입이면 `None`
fn read_value(
    cursor: &mut Cursor<&[u8]>,
    ty: u8,
    meta: u16,
    unsigned: bool,
) -> io::Result<Option<Value>> {
    use column_type::*;

    let value = match ty {
        TINY if unsigned => Value::from(cursor.read_u8()?),
        TINY => Value::from(cursor.read_i8()?),
        SHORT if unsigned => Value::from(cursor.read_u16::<LittleEndian>()?),
        SHORT => Value::from(cursor.read_i16::<LittleEndian>()?),
        INT24 if unsigned => Value::from(cursor.read_u24::<LittleEndian>()?),
        INT24 => Value::from(cursor.read_i24::<LittleEndian>()?),
        LONG if unsigned => Value::from(cursor.read_u32::<LittleEndian>()?),
        LONG => Value::from(cursor.read_i32::<LittleEndian>()?),
        LONGLONG if unsigned => Value::from(cursor.read_u64::<LittleEndian>()?),
        LONGLONG => Value::from(cursor.read_i64::<LittleEndian>()?),
        FLOAT => Value::from(cursor.read_f32::<LittleEndian>()? as f64),
        DOUBLE => Value::from(cursor.read_f64::<LittleEndian>()?),
        YEAR => match cursor.read_u8()? {
            0 => Value::from(0),
            year => Value::from(1900 + year as u32),
        },
        NEWDECIMAL => {
            let (precision, scale) = ((meta >> 8) as usize, (meta & 0xFF) as usize);
            Value::from(read_decimal(cursor, precision, scale)?)
        }
        VARCHAR | VAR_STRING => {
            let len = if meta < 256 {
                cursor.read_u8()? as usize
            } else {
                cursor.read_u16::<LittleEndian>()? as usize
            };
            bytes_value(read_bytes(cursor, len)?)
        }
        STRING | ENUM | SET => {
            let (real_type, len) = string_type_and_length(ty, meta);
            match real_type {
                ENUM => Value::from(cursor.read_uint::<LittleEndian>(len.clamp(1, 2))?),
                SET => Value::from(cursor.read_uint::<LittleEndian>(len.clamp(1, 8))?),
                _ => {
                    let len = if len < 256 {
                        cursor.read_u8()? as usize
                    } else {
                        cursor.read_u16::<LittleEndian>()? as usize
                    };
                    bytes_value(read_bytes(cursor, len)?)
                }
            }
        }
        BLOB | TINY_BLOB | MEDIUM_BLOB | LONG_BLOB | JSON | GEOMETRY => {
            let prefix = (meta as usize).clamp(1, 4);
            let len = cursor.read_uint::<LittleEndian>(prefix)? as usize;
            bytes_value(read_bytes(cursor, len)?)
        }
        BIT => {
            let bits = (meta >> 8) as usize * 8 + (meta & 0xFF) as usize;
            let len = (bits + 7) / 8;
            if len == 0 {
                Value::from(0)
            } else {
                Value::from(cursor.read_uint::<BigEndian>(len.min(8))?)
            }
        }
        DATE => {
            let v = cursor.read_u24::<LittleEndian>()?;
            Value::from(format!("{:04}-{:02}-{:02}", v >> 9, (v >> 5) & 0x0F, v & 0x1F))
        }
        TIMESTAMP => Value::from(format_timestamp(cursor.read_u32::<LittleEndian>()?, 0, 0)),
        TIMESTAMP2 => {
            let seconds = cursor.read_u32::<BigEndian>()?;
            let micros = read_fraction(cursor, meta)?;
            Value::from(format_timestamp(seconds, micros, meta))
        }
        DATETIME => {
            let v = cursor.read_u64::<LittleEndian>()?;
            let (date, time) = (v / 1_000_000, v % 1_000_000);
            Value::from(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                date / 10_000,
                (date % 10_000) / 100,
                date % 100,
                time / 10_000,
                (time % 10_000) / 100,
                time % 100
            ))
        }
        DATETIME2 => {
            let packed = cursor.read_uint::<BigEndian>(5)? as i64 - 0x80_0000_0000;
            let micros = read_fraction(cursor, meta)?;
            Value::from(format_datetime2(packed, micros, meta))
        }
        TIME => {
            let v = cursor.read_u24::<LittleEndian>()?;
            Value::from(format!("{:02}:{:02}:{:02}", v / 10_000, (v % 10_000) / 100, v % 100))
        }
        TIME2 => Value::from(read_time2(cursor, meta)?),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// STRING 메타데이터에는 실제 타입(ENUM/SET/STRING)과 길이가 함께 들어 있다
fn string_type_and_length(ty: u8, meta: u16) -> (u8, usize) {
    if meta < 256 {
        return (ty, meta as usize);
    }
    let b0 = (meta >> 8) as u8;
    let b1 = (meta & 0xFF) as usize;
    if b0 & 0x30 != 0x30 {
        (b0 | 0x30, b1 | ((((b0 & 0x30) ^ 0x30) as usize) << 4))
    } else {
        (b0, b1)
    }
}

fn bytes_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => {
            let hex: String = e.as_bytes().iter().map(|b| format!("{:02x}", b)).collect();
            Value::String(format!("0x{}", hex))
        }
    }
}

/// fsp 자리 소수부를 마이크로초로
fn read_fraction(cursor: &mut Cursor<&[u8]>, fsp: u16) -> io::Result<u32> {
    Ok(match fsp {
        1 | 2 => cursor.read_u8()? as u32 * 10_000,
        3 | 4 => cursor.read_u16::<BigEndian>()? as u32 * 100,
        5 | 6 => cursor.read_u24::<BigEndian>()?,
        _ => 0,
    })
}

fn fraction_suffix(micros: u32, fsp: u16) -> String {
    match fsp {
        1..=6 => format!(".{:06}", micros)[..1 + fsp as usize].to_string(),
        _ => String::new(),
    }
}

fn format_timestamp(seconds: u32, micros: u32, fsp: u16) -> String {
    if seconds == 0 {
        return format!("0000-00-00 00:00:00{}", fraction_suffix(0, fsp));
    }
    match Utc.timestamp_opt(seconds as i64, 0).single() {
        Some(at) => format!("{}{}", at.format("%Y-%m-%d %H:%M:%S"), fraction_suffix(micros, fsp)),
        None => seconds.to_string(),
    }
}

fn format_datetime2(packed: i64, micros: u32, fsp: u16) -> String {
    let ymd = packed >> 17;
    let ym = ymd >> 5;
    let hms = packed & 0x1_FFFF;
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
        ym / 13,
        ym % 13,
        ymd & 0x1F,
        hms >> 12,
        (hms >> 6) & 0x3F,
        hms & 0x3F,
        fraction_suffix(micros, fsp)
    )
}

fn read_time2(cursor: &mut Cursor<&[u8]>, fsp: u16) -> io::Result<String> {
    let packed: i64 = match fsp {
        1 | 2 => {
            let mut int_part = cursor.read_u24::<BigEndian>()? as i64 - 0x80_0000;
            let mut frac = cursor.read_u8()? as i64;
            if int_part < 0 && frac > 0 {
                int_part += 1;
                frac -= 0x100;
            }
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut int_part = cursor.read_u24::<BigEndian>()? as i64 - 0x80_0000;
            let mut frac = cursor.read_u16::<BigEndian>()? as i64;
            if int_part < 0 && frac > 0 {
                int_part += 1;
                frac -= 0x1_0000;
            }
            (int_part << 24) + frac * 100
        }
        5 | 6 => cursor.read_u48::<BigEndian>()? as i64 - 0x8000_0000_0000,
        _ => (cursor.read_u24::<BigEndian>()? as i64 - 0x80_0000) << 24,
    };

    let (sign, packed) = if packed < 0 { ("-", -packed) } else { ("", packed) };
    let hms = packed >> 24;
    let micros = packed % (1 << 24);
    let text = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        (hms >> 12) % (1 << 10),
        (hms >> 6) % (1 << 6),
        hms % (1 << 6)
    );
    Ok(if micros != 0 {
        format!("{}.{:06}", text, micros)
    } else {
        text
    })
}

/// 정수부/소수부를 9자리 단위로 4 bytes씩 저장하는 packed decimal
fn read_decimal(cursor: &mut Cursor<&[u8]>, precision: usize, scale: usize) -> io::Result<String> {
    const DIGITS_PER_INT: usize = 9;
    const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

    if scale > precision || precision > 65 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid decimal({}, {})", precision, scale),
        ));
    }
    let integral = precision - scale;
    let (full_int, partial_int) = (integral / DIGITS_PER_INT, integral % DIGITS_PER_INT);
    let (full_frac, partial_frac) = (scale / DIGITS_PER_INT, scale % DIGITS_PER_INT);
    let size = full_int * 4 + DIG2BYTES[partial_int] + full_frac * 4 + DIG2BYTES[partial_frac];

    let mut bytes = read_bytes(cursor, size)?;
    if bytes.is_empty() {
        return Ok("0".to_string());
    }
    let positive = bytes[0] & 0x80 != 0;
    bytes[0] ^= 0x80;
    if !positive {
        bytes.iter_mut().for_each(|b| *b = !*b);
    }

    let mut digits = Cursor::new(&bytes[..]);
    let mut int_text = String::new();
    if partial_int > 0 {
        let v = digits.read_uint::<BigEndian>(DIG2BYTES[partial_int])?;
        int_text.push_str(&v.to_string());
    }
    for _ in 0..full_int {
        let v = digits.read_u32::<BigEndian>()?;
        int_text.push_str(&format!("{:09}", v));
    }
    let int_text = int_text.trim_start_matches('0');

    let mut text = String::new();
    if !positive {
        text.push('-');
    }
    text.push_str(if int_text.is_empty() { "0" } else { int_text });

    if scale > 0 {
        text.push('.');
        for _ in 0..full_frac {
            let v = digits.read_u32::<BigEndian>()?;
            text.push_str(&format!("{:09}", v));
        }
        if partial_frac > 0 {
            let v = digits.read_uint::<BigEndian>(DIG2BYTES[partial_frac])?;
            text.push_str(&format!("{:0width$}", v, width = partial_frac));
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::column_type::*;
    use super::*;
    use serde_json::json;

    fn table(types: &[u8], meta: &[u16], nullable: u8) -> TableMapData {
        TableMapData {
            table_id: 7,
            schema: "shop".to_string(),
            table: "orders".to_string(),
            column_types: types.to_vec(),
            column_meta: meta.to_vec(),
            null_bitmap: vec![nullable],
            column_names: Vec::new(),
            unsigned: Vec::new(),
        }
    }

    fn value(ty: u8, meta: u16, bytes: &[u8]) -> Value {
        let mut cursor = Cursor::new(bytes);
        let value = read_value(&mut cursor, ty, meta, false).unwrap().unwrap();
        assert_eq!(cursor.position() as usize, bytes.len(), "trailing bytes for type {}", ty);
        value
    }

    #[test]
    fn test_decode_write_rows_with_null() {
        let table = table(&[LONG, VARCHAR], &[0, 64], 0b10);
        let mut body = vec![2, 0b11];
        body.push(0b00);
        body.extend_from_slice(&42i32.to_le_bytes());
        body.push(5);
        body.extend_from_slice(b"alice");
        body.push(0b10);
        body.extend_from_slice(&(-7i32).to_le_bytes());

        let rows = decode_rows(EventType::WriteRows, &body, &table).unwrap();
        assert_eq!(rows, vec![vec![json!(42), json!("alice")], vec![json!(-7), Value::Null]]);
    }

    #[test]
    fn test_decode_update_rows_interleaves_before_and_after() {
        let table = table(&[TINY, SHORT], &[0, 0], 0);
        let mut body = vec![2, 0b11, 0b10];
        // before: 두 컬럼 모두
        body.extend_from_slice(&[0b00, 1, 0x10, 0x00]);
        // after: 두 번째 컬럼만
        body.extend_from_slice(&[0b0, 0x20, 0x00]);

        let rows = decode_rows(EventType::UpdateRows, &body, &table).unwrap();
        assert_eq!(rows, vec![vec![json!(1), json!(16)], vec![Value::Null, json!(32)]]);
    }

    #[test]
    fn test_decode_rejects_column_count_mismatch() {
        let table = table(&[LONG], &[0], 0);
        let err = decode_rows(EventType::DeleteRows, &[2, 0b11, 0], &table).unwrap_err();
        assert!(err.to_string().contains("has 2 columns"));
    }

    #[test]
    fn test_decode_truncated_row() {
        let table = table(&[LONGLONG], &[0], 0);
        let err = decode_rows(EventType::WriteRows, &[1, 0b1, 0, 1, 2, 3], &table).unwrap_err();
        assert!(matches!(err, BridgeError::BinlogParseError(_)));
    }

    #[test]
    fn test_decode_unsupported_type() {
        let table = table(&[DECIMAL], &[0], 0);
        let err = decode_rows(EventType::WriteRows, &[1, 0b1, 0, 0], &table).unwrap_err();
        assert!(err.to_string().contains("Unsupported column type 0"));
    }

    #[test]
    fn test_unsigned_integers() {
        let mut cursor = Cursor::new(&[0xFF, 0xFF, 0xFF, 0xFF][..]);
        let v = read_value(&mut cursor, LONG, 0, true).unwrap().unwrap();
        assert_eq!(v, json!(4_294_967_295u32));

        assert_eq!(value(LONG, 0, &[0xFF, 0xFF, 0xFF, 0xFF]), json!(-1));
        assert_eq!(value(INT24, 0, &[0xFE, 0xFF, 0xFF]), json!(-2));
    }

    #[test]
    fn test_fixed_width_values() {
        assert_eq!(value(DOUBLE, 8, &1.5f64.to_le_bytes()), json!(1.5));
        assert_eq!(value(FLOAT, 4, &0.25f32.to_le_bytes()), json!(0.25));
        assert_eq!(value(YEAR, 0, &[124]), json!(2024));
        assert_eq!(value(BIT, 0x0104, &[0x0A, 0xBC]), json!(0x0ABC));
    }

    #[test]
    fn test_string_types() {
        // CHAR(4) utf8mb4: real type STRING, 길이 16
        assert_eq!(value(STRING, 0xFE10, &[2, b'o', b'k']), json!("ok"));
        // ENUM 1 byte, SET 2 bytes
        assert_eq!(value(STRING, 0xF701, &[3]), json!(3));
        assert_eq!(value(STRING, 0xF802, &[0x05, 0x00]), json!(5));
        assert_eq!(value(BLOB, 2, &[3, 0, 0xDE, 0xAD, 0xBE]), json!("0xdeadbe"));
        assert_eq!(value(VARCHAR, 300, &[2, 0, b'h', b'i']), json!("hi"));
    }

    #[test]
    fn test_string_length_above_255() {
        // CHAR(255) utf8mb4 는 길이 1020 → 상위 비트가 타입 바이트에 섞인다
        assert_eq!(string_type_and_length(STRING, 0xCEFC), (STRING, 1020));
        assert_eq!(string_type_and_length(STRING, 0xF701), (ENUM, 1));
    }

    #[test]
    fn test_decimal() {
        let decimal_10_2 = (10 << 8) | 2;
        assert_eq!(value(NEWDECIMAL, decimal_10_2, &[0x80, 0x00, 0x04, 0xD2, 0x38]), json!("1234.56"));
        assert_eq!(value(NEWDECIMAL, decimal_10_2, &[0x7F, 0xFF, 0xFB, 0x2D, 0xC7]), json!("-1234.56"));
        assert_eq!(value(NEWDECIMAL, (4 << 8) | 2, &[0x80, 0x05]), json!("0.05"));
    }

    #[test]
    fn test_temporal_values() {
        // 2024-03-15
        let date = (2024u32 << 9) | (3 << 5) | 15;
        assert_eq!(value(DATE, 0, &date.to_le_bytes()[..3]), json!("2024-03-15"));

        // 2024-03-15 10:20:30.5 (fsp 1)
        let ym = 2024i64 * 13 + 3;
        let packed = (((ym << 5) | 15) << 17) | (10 << 12) | (20 << 6) | 30;
        let raw = (packed + 0x80_0000_0000) as u64;
        let mut bytes = raw.to_be_bytes()[3..].to_vec();
        bytes.push(50);
        assert_eq!(value(DATETIME2, 1, &bytes), json!("2024-03-15 10:20:30.5"));

        let mut bytes = 1_700_000_000u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x7B]);
        assert_eq!(value(TIMESTAMP2, 3, &bytes), json!("2023-11-14 22:13:20.012"));
        assert_eq!(value(TIMESTAMP2, 0, &[0, 0, 0, 0]), json!("0000-00-00 00:00:00"));

        // 12:34:56 과 -01:00:00
        let time = 0x80_0000u32 + ((12 << 12) | (34 << 6) | 56);
        assert_eq!(value(TIME2, 0, &time.to_be_bytes()[1..]), json!("12:34:56"));
        let time = 0x80_0000u32 - (1 << 12);
        assert_eq!(value(TIME2, 0, &time.to_be_bytes()[1..]), json!("-01:00:00"));
    }

    #[test]
    fn test_column_schema() {
        let mut table = table(&[LONG, VARCHAR], &[0, 64], 0b10);
        table.column_names = vec!["id".to_string(), "name".to_string()];
        table.unsigned = vec![true, false];

        let columns = column_schema(&table);
        assert_eq!(columns[0].name.as_deref(), Some("id"));
        assert_eq!(columns[0].column_type, "int");
        assert!(columns[0].unsigned && !columns[0].nullable);
        assert!(columns[1].nullable);

        let json = serde_json::to_value(&columns[1]).unwrap();
        assert_eq!(json["type"], "varchar");
    }
}

//! MySQL 인증 처리
//!
//! mysql_native_password 방식만 지원한다.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Client capability flags
pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const TRANSACTIONS: u32 = 8192;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

/// Native password 인증 응답 생성
///
/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`
pub fn create_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// HandshakeResponse41 패킷 생성
pub fn create_handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
) -> Result<Vec<u8>, std::io::Error> {
    let mut buffer = Vec::new();

    let mut flags = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::TRANSACTIONS
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;

    if database.is_some() {
        flags |= capabilities::CONNECT_WITH_DB;
    }

    buffer.write_u32::<LittleEndian>(flags)?;

    // Max packet size, 0 = 기본값 (16MB)
    buffer.write_u32::<LittleEndian>(0)?;
    buffer.write_u8(collation)?;
    buffer.write_all(&[0u8; 23])?;

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let auth_response = create_auth_response(password, scramble);
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(NATIVE_PASSWORD_PLUGIN.as_bytes())?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_auth_response_empty_password() {
        let response = create_auth_response("", &[1, 2, 3, 4]);
        assert!(response.is_empty());
    }

    #[test]
    fn test_create_auth_response() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let response = create_auth_response("password", &scramble);
        assert_eq!(response.len(), 20);
        assert_ne!(response, create_auth_response("password", &[0u8; 8]));
    }

    #[test]
    fn test_create_handshake_response() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let packet = create_handshake_response("root", "password", None, &scramble, 33).unwrap();

        // flags(4) + max packet(4) + collation(1) + reserved(23)
        assert_eq!(&packet[32..37], b"root\0");
        assert_eq!(packet[37], 20);
        assert!(packet.ends_with(b"mysql_native_password\0"));

        let flags = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_eq!(flags & capabilities::CONNECT_WITH_DB, 0);
    }
}

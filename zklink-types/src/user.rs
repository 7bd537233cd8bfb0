//! User records (72-byte layout)
//!
//! ```text
//! offset  size  field
//!      0     2  uid (LE)
//!      2     1  role
//!      3     8  password
//!     11    24  name
//!     35     4  card number (LE)
//!     39     9  group / reserved
//!     48    24  user id (ASCII)
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::records::{read_str, write_str, Record};

/// Role byte of a regular user
pub const ROLE_USER: u8 = 0;

/// Role byte of an administrator
pub const ROLE_ADMIN: u8 = 14;

/// A user enrolled on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Internal slot number
    pub uid: u16,

    pub role: u8,

    pub password: String,

    pub name: String,

    pub card_number: u32,

    /// Enrollment id shown on the terminal
    pub user_id: String,
}

impl User {
    pub const SIZE: usize = 72;

    pub fn new(uid: u16, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid,
            role: ROLE_USER,
            password: String::new(),
            name: name.into(),
            card_number: 0,
            user_id: user_id.into(),
        }
    }

    pub fn with_role(mut self, role: u8) -> Self {
        self.role = role;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_card(mut self, card_number: u32) -> Self {
        self.card_number = card_number;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Lay the user out as a USER_WRQ payload
    ///
    /// Text fields longer than their slot are truncated.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        LittleEndian::write_u16(&mut buf[0..2], self.uid);
        buf[2] = self.role;
        write_str(&mut buf[3..11], &self.password);
        write_str(&mut buf[11..35], &self.name);
        LittleEndian::write_u32(&mut buf[35..39], self.card_number);
        write_str(&mut buf[48..72], &self.user_id);

        buf
    }
}

impl Record for User {
    const SIZE: usize = User::SIZE;

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::too_short("user", Self::SIZE, bytes.len()));
        }

        Ok(Self {
            uid: LittleEndian::read_u16(&bytes[0..2]),
            role: bytes[2],
            password: read_str(&bytes[3..11]),
            name: read_str(&bytes[11..35]),
            card_number: LittleEndian::read_u32(&bytes[35..39]),
            user_id: read_str(&bytes[48..72]),
        })
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User[{}] {} (uid {})", self.user_id, self.name, self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::decode_all;
    use pretty_assertions::assert_eq;

    fn raw_user() -> [u8; 72] {
        let mut raw = [0u8; 72];
        raw[0..2].copy_from_slice(&7u16.to_le_bytes());
        raw[2] = ROLE_ADMIN;
        raw[3..7].copy_from_slice(b"1234");
        raw[11..21].copy_from_slice(b"Jane Doe  ");
        raw[35..39].copy_from_slice(&0x00C0FFEEu32.to_le_bytes());
        raw[48..52].copy_from_slice(b"1007");
        raw
    }

    #[test]
    fn test_decode_layout() {
        let user = User::decode(&raw_user()).unwrap();

        assert_eq!(
            user,
            User {
                uid: 7,
                role: ROLE_ADMIN,
                password: "1234".into(),
                name: "Jane Doe".into(),
                card_number: 0x00C0FFEE,
                user_id: "1007".into(),
            }
        );
        assert!(user.is_admin());
    }

    #[test]
    fn test_encode_matches_decode_layout() {
        let user = User::new(7, "1007", "Jane Doe")
            .with_role(ROLE_ADMIN)
            .with_password("1234")
            .with_card(0x00C0FFEE);

        let encoded = user.encode();
        assert_eq!(User::decode(&encoded).unwrap(), user);
        assert_eq!(&encoded[48..53], b"1007\0");
    }

    #[test]
    fn test_long_user_id() {
        let user = User::new(1, "ABCDEFGHIJKLMN", "x");
        let encoded = user.encode();

        assert_eq!(&encoded[48..62], b"ABCDEFGHIJKLMN");
        assert_eq!(User::decode(&encoded).unwrap().user_id, "ABCDEFGHIJKLMN");

        // 24 bytes is the widest id the record holds
        let widest = "1".repeat(30);
        let decoded = User::decode(&User::new(1, widest, "x").encode()).unwrap();
        assert_eq!(decoded.user_id, "1".repeat(24));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            User::decode(&[0; 40]),
            Err(Error::RecordTooShort { expected: 72, actual: 40, .. })
        ));
    }

    #[test]
    fn test_decode_bulk_buffer() {
        let mut buffer = (144u32).to_le_bytes().to_vec();
        buffer.extend_from_slice(&raw_user());
        buffer.extend_from_slice(&User::new(8, "42", "Bob").encode());

        let users: Vec<User> = decode_all(&buffer).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].user_id, "42");
        assert_eq!(users[1].name, "Bob");
    }
}

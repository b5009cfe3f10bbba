//! The single fixed record shape this table stores: `(id, username, email)`.
use crate::errors::Error;

/// A row failed to construct because one of its fields doesn't fit the
/// fixed-width columns. Recoverable: the REPL reports it and keeps going,
/// unlike [`Error`] which signals storage-layer corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringTooLong;

impl std::fmt::Display for StringTooLong {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "String is too long.")
    }
}

impl std::error::Error for StringTooLong {}

pub const COLUMN_USERNAME_SIZE: usize = 32;
pub const COLUMN_EMAIL_SIZE: usize = 255;

const ID_SIZE: usize = 4;
const USERNAME_SIZE: usize = COLUMN_USERNAME_SIZE + 1;
const EMAIL_SIZE: usize = COLUMN_EMAIL_SIZE + 1;

const ID_OFFSET: usize = 0;
const USERNAME_OFFSET: usize = ID_OFFSET + ID_SIZE;
const EMAIL_OFFSET: usize = USERNAME_OFFSET + USERNAME_SIZE;

/// Serialized width of a row: `id ‖ username(33) ‖ email(256)`.
pub const ROW_SIZE: usize = ID_SIZE + USERNAME_SIZE + EMAIL_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    pub username: String,
    pub email: String,
}

impl Row {
    pub fn new(
        id: u32,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, StringTooLong> {
        let username = username.into();
        let email = email.into();
        if username.len() > COLUMN_USERNAME_SIZE || email.len() > COLUMN_EMAIL_SIZE {
            return Err(StringTooLong);
        }
        Ok(Row { id, username, email })
    }

    /// Writes the little-endian, null-padded fixed-width encoding of this
    /// row. `out` must be exactly `ROW_SIZE` bytes.
    pub fn serialize(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), ROW_SIZE);
        out[ID_OFFSET..ID_OFFSET + ID_SIZE].copy_from_slice(&self.id.to_le_bytes());

        let username_bytes = self.username.as_bytes();
        let username_slot = &mut out[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE];
        username_slot.fill(0);
        username_slot[..username_bytes.len()].copy_from_slice(username_bytes);

        let email_bytes = self.email.as_bytes();
        let email_slot = &mut out[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE];
        email_slot.fill(0);
        email_slot[..email_bytes.len()].copy_from_slice(email_bytes);
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != ROW_SIZE {
            return Err(Error::Corrupt(format!(
                "row buffer has {} bytes, expected {ROW_SIZE}",
                bytes.len()
            )));
        }
        let mut id_bytes = [0u8; ID_SIZE];
        id_bytes.copy_from_slice(&bytes[ID_OFFSET..ID_OFFSET + ID_SIZE]);
        let id = u32::from_le_bytes(id_bytes);

        let username = read_nul_padded(&bytes[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE])?;
        let email = read_nul_padded(&bytes[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE])?;

        Ok(Row { id, username, email })
    }
}

fn read_nul_padded(field: &[u8]) -> Result<String, Error> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|e| Error::Corrupt(format!("row field is not valid UTF-8: {e}")))
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.username, self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let row = Row::new(7, "alice", "alice@example.com").unwrap();
        let mut buf = [0u8; ROW_SIZE];
        row.serialize(&mut buf);
        let back = Row::deserialize(&buf).unwrap();
        assert_eq!(row, back);
    }

    #[test]
    fn rejects_oversized_username() {
        let long = "a".repeat(COLUMN_USERNAME_SIZE + 1);
        assert!(Row::new(1, long, "e@x.com").is_err());
    }

    #[test]
    fn rejects_oversized_email() {
        let long = "a".repeat(COLUMN_EMAIL_SIZE + 1);
        assert!(Row::new(1, "bob", long).is_err());
    }

    #[test]
    fn row_size_matches_reference_layout() {
        assert_eq!(ROW_SIZE, 293);
    }
}

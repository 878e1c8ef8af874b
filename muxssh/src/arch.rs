//! Primitive data types of the SSH wire format, as described in RFC 4251 §5.

use std::{fmt, ops::Deref};

use binrw::binrw;

/// A `string`: a `uint32` length followed by arbitrary bytes.
#[binrw]
#[brw(big)]
#[derive(Default, Clone, PartialEq, Eq, Hash)]
pub struct Bytes {
    #[bw(calc = inner.len() as u32)]
    len: u32,

    #[br(count = len)]
    inner: Vec<u8>,
}

impl Bytes {
    /// Create a [`Bytes`] from anything convertible to a byte vector.
    pub fn new(inner: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    /// Extract the inner byte vector.
    pub fn into_vec(self) -> Vec<u8> {
        self.inner
    }

    /// Lossily convert the bytes to an UTF-8 string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner).into_owned()
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.inner) {
            Ok(string) => write!(f, "{string:?}"),
            Err(_) => write!(f, "[{} bytes]", self.inner.len()),
        }
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<&[u8]> for Bytes {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Bytes {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Bytes {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A `boolean`: a single byte, where any non-zero value is `true`.
#[binrw]
#[brw(big)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bool(
    #[br(map = |value: u8| value != 0)]
    #[bw(map = |value: &bool| u8::from(*value))]
    bool,
);

impl Deref for Bool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<bool> for Bool {
    fn from(value: bool) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::{BinRead, BinWrite};

    use super::*;

    #[test]
    fn bytes_are_length_prefixed() {
        let mut cursor = Cursor::new(Vec::new());
        Bytes::from("sftp").write(&mut cursor).unwrap();

        assert_eq!(cursor.into_inner(), b"\x00\x00\x00\x04sftp");
    }

    #[test]
    fn bool_accepts_any_non_zero() {
        let value = Bool::read(&mut Cursor::new([0x2a])).unwrap();

        assert!(*value);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        assert!(Bytes::read(&mut Cursor::new(b"\x00\x00\x00\x10abc")).is_err());
    }
}

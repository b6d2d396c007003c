// Client/server wire envelope
//
// One flag byte followed by the payload: `0` for a result, `1` for an
// error whose payload is a UTF-8 message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const FLAG_DATA: u8 = 0;
const FLAG_ERROR: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Data(Bytes),
    Error(String),
}

impl Package {
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::Data(payload.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn encode(&self) -> Bytes {
        let payload: &[u8] = match self {
            Self::Data(data) => data,
            Self::Error(message) => message.as_bytes(),
        };
        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(match self {
            Self::Data(_) => FLAG_DATA,
            Self::Error(_) => FLAG_ERROR,
        });
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(Error::InvalidPackage);
        }
        let flag = buf.get_u8();
        match flag {
            FLAG_DATA => Ok(Self::Data(Bytes::copy_from_slice(buf))),
            FLAG_ERROR => {
                let message = std::str::from_utf8(buf).map_err(|_| Error::InvalidPackage)?;
                Ok(Self::Error(message.to_string()))
            }
            _ => Err(Error::InvalidPackage),
        }
    }
}

impl From<&Error> for Package {
    fn from(err: &Error) -> Self {
        Self::Error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_layout() -> anyhow::Result<()> {
        let encoded = Package::data(&b"row"[..]).encode();
        assert_eq!(&encoded[..], b"\x00row");
        assert_eq!(Package::decode(&encoded)?, Package::data(&b"row"[..]));

        // An empty result is still a valid package.
        assert_eq!(Package::decode(&[0])?, Package::data(Bytes::new()));

        Ok(())
    }

    #[test]
    fn test_error_layout() -> anyhow::Result<()> {
        let package = Package::from(&Error::Deadlock);
        assert!(package.is_error());

        let encoded = package.encode();
        assert_eq!(encoded[0], FLAG_ERROR);
        assert_eq!(&encoded[1..], b"Deadlock detected");
        assert_eq!(Package::decode(&encoded)?, Package::error("Deadlock detected"));

        Ok(())
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(Package::decode(&[]), Err(Error::InvalidPackage)));
        assert!(matches!(Package::decode(&[2, 1]), Err(Error::InvalidPackage)));
        assert!(matches!(
            Package::decode(&[1, 0xff, 0xfe]),
            Err(Error::InvalidPackage)
        ));
    }
}

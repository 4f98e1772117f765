//! The byte-level interface to a card reader.


use std::fmt;


/// A failure in the underlying reader or its driver.
#[derive(Debug)]
pub struct TransportError {
    inner: Box<dyn std::error::Error + Send + Sync>,
}
impl TransportError {
    pub fn new<E: Into<Box<dyn std::error::Error + Send + Sync>>>(inner: E) -> Self {
        Self { inner: inner.into() }
    }
}
impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: {}", self.inner)
    }
}
impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}
impl From<pcsc::Error> for TransportError {
    fn from(value: pcsc::Error) -> Self { Self::new(value) }
}


/// A connection to a contactless card.
///
/// Exchanges raw APDU byte strings; framing, secure messaging and protocol
/// state all live above this interface. Implementations are expected to carry
/// one outstanding command at a time.
pub trait CardTransport {
    /// Opens the connection. Calling this on an open transport is a no-op.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Closes the connection.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Sends a raw command APDU and returns the raw response APDU.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Returns the answer-to-reset bytes of the card.
    fn atr(&self) -> Result<Vec<u8>, TransportError>;
}

/// PC/SC-connected readers.
///
/// The connection lifetime is managed by [`pcsc::Context::connect`] and
/// [`pcsc::Card::disconnect`]; `open` and `close` are therefore no-ops here.
impl CardTransport for pcsc::Card {
    fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut response_buf = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        let response = pcsc::Card::transmit(self, command, &mut response_buf)?;
        Ok(response.to_vec())
    }

    fn atr(&self) -> Result<Vec<u8>, TransportError> {
        let length = self.get_attribute_len(pcsc::Attribute::AtrString)?;
        let mut atr_buf = vec![0u8; length];
        let atr = self.get_attribute(pcsc::Attribute::AtrString, &mut atr_buf)?;
        Ok(atr.to_vec())
    }
}

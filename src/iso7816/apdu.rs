//! Command and response APDUs.
//!
//! Commands are serialized in either short form (Lc ≤ 255, Ne ≤ 256) or
//! extended form (Lc ≤ 65535, Ne ≤ 65536); the form is chosen automatically
//! unless the caller forces extended encoding. An expected length of zero is
//! represented as [`ExpectedLength::Max`] and encoded as `0x00`
//! (respectively `0x0000`) per the ISO convention.


use std::fmt;


/// CLA bit indicating that more command blocks follow in a chain.
pub const CLA_CHAINING: u8 = 0b0001_0000;

/// CLA bits indicating secure messaging with an authenticated header.
pub const CLA_SECURE_MESSAGING: u8 = 0b0000_1100;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum EncodeError {
    DataTooLong { obtained: usize },
    ExpectedLengthTooLong { obtained: usize },
}
impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataTooLong { obtained }
                => write!(f, "command data of {} bytes does not fit any APDU form", obtained),
            Self::ExpectedLengthTooLong { obtained }
                => write!(f, "expected length of {} bytes does not fit any APDU form", obtained),
        }
    }
}
impl std::error::Error for EncodeError {
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}


/// The number of response bytes the terminal is prepared to accept.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ExpectedLength {
    /// No response data expected; the Le field is absent.
    #[default]
    None,

    /// Up to the given number of bytes (1 ..= 65536).
    Bytes(u32),

    /// As many bytes as the current form allows (256 short, 65536 extended).
    Max,
}


/// A command APDU.
///
/// `extended` forces extended-length encoding; it is also selected
/// automatically whenever the data or the expected length exceed the short
/// form's bounds.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandApdu {
    pub header: CommandHeader,
    pub data: Vec<u8>,
    pub expected: ExpectedLength,
    pub extended: bool,
}
impl CommandApdu {
    pub fn new(header: CommandHeader, data: Vec<u8>, expected: ExpectedLength) -> Self {
        Self {
            header,
            data,
            expected,
            extended: false,
        }
    }

    fn requires_extended_form(&self) -> Result<bool, EncodeError> {
        if self.data.len() > 65535 {
            return Err(EncodeError::DataTooLong { obtained: self.data.len() });
        }
        if let ExpectedLength::Bytes(n) = self.expected {
            if n > 65536 {
                return Err(EncodeError::ExpectedLengthTooLong { obtained: n as usize });
            }
        }
        let data_fits_short = self.data.len() <= 255;
        let expected_fits_short = match self.expected {
            ExpectedLength::None|ExpectedLength::Max => true,
            ExpectedLength::Bytes(n) => n <= 256,
        };
        Ok(self.extended || !data_fits_short || !expected_fits_short)
    }

    /// Serializes the command, choosing short or extended form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let extended = self.requires_extended_form()?;

        let mut ret = Vec::with_capacity(4 + 3 + self.data.len() + 3);
        ret.extend(self.header.to_bytes());

        if !self.data.is_empty() {
            if extended {
                // [0x00] [LcMSB] [LcLSB]; 65536 cannot be encoded as Lc
                let lc = u16::try_from(self.data.len()).unwrap_or(0);
                ret.push(0x00);
                ret.extend(lc.to_be_bytes());
            } else {
                // 256 bytes of data would encode as Lc=0x00, which means
                // "absent" on the wire; the caller gets extended form instead
                ret.push(self.data.len() as u8);
            }
            ret.extend(&self.data);
        }

        match self.expected {
            ExpectedLength::None => {},
            ExpectedLength::Bytes(n) => {
                if extended {
                    if self.data.is_empty() {
                        ret.push(0x00);
                    }
                    // Ne == 65536 encodes as 0x0000
                    let le = if n == 65536 { 0 } else { n as u16 };
                    ret.extend(le.to_be_bytes());
                } else {
                    // Ne == 256 encodes as 0x00
                    let le = if n == 256 { 0 } else { n as u8 };
                    ret.push(le);
                }
            },
            ExpectedLength::Max => {
                if extended {
                    if self.data.is_empty() {
                        ret.push(0x00);
                    }
                    ret.extend([0x00, 0x00]);
                } else {
                    ret.push(0x00);
                }
            },
        }

        Ok(ret)
    }
}


/// A two-byte status word.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusWord(pub u16);
impl StatusWord {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self(u16::from_be_bytes([sw1, sw2]))
    }

    pub const fn sw1(&self) -> u8 { (self.0 >> 8) as u8 }
    pub const fn sw2(&self) -> u8 { (self.0 & 0xFF) as u8 }

    pub const fn is_success(&self) -> bool {
        self.0 == crate::iso7816::files::sw::NO_ERROR
    }
}
impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord(0x{:04X})", self.0)
    }
}
impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}


/// A response APDU: data followed by a status word.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw: StatusWord,
}
impl ResponseApdu {
    /// Splits a raw response into data and trailer. Returns `None` if the
    /// response is shorter than the two-byte trailer.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        let (data, trailer) = bytes.split_at(bytes.len() - 2);
        Some(Self {
            data: data.to_vec(),
            sw: StatusWord::new(trailer[0], trailer[1]),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn command(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], expected: ExpectedLength) -> CommandApdu {
        CommandApdu::new(CommandHeader::new(cla, ins, p1, p2), data.to_vec(), expected)
    }

    #[test]
    fn test_case_1() {
        let apdu = command(0x00, 0xA4, 0x04, 0x0C, &[], ExpectedLength::None);
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 A4 04 0C"));
    }

    #[test]
    fn test_case_2_short() {
        let apdu = command(0x00, 0x84, 0x00, 0x00, &[], ExpectedLength::Bytes(8));
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 84 00 00 08"));

        // Ne == 256 encodes as 0x00
        let apdu = command(0x00, 0xB0, 0x00, 0x00, &[], ExpectedLength::Bytes(256));
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 B0 00 00 00"));

        let apdu = command(0x00, 0xB0, 0x00, 0x00, &[], ExpectedLength::Max);
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 B0 00 00 00"));
    }

    #[test]
    fn test_case_2_extended() {
        let apdu = command(0x00, 0xB0, 0x00, 0x00, &[], ExpectedLength::Bytes(0x1234));
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 B0 00 00 00 12 34"));

        // Ne == 65536 encodes as 0x0000
        let apdu = command(0x00, 0xB0, 0x00, 0x00, &[], ExpectedLength::Bytes(65536));
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 B0 00 00 00 00 00"));

        let mut apdu = command(0x00, 0xB0, 0x00, 0x00, &[], ExpectedLength::Max);
        apdu.extended = true;
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 B0 00 00 00 00 00"));
    }

    #[test]
    fn test_case_3() {
        let apdu = command(0x00, 0xA4, 0x02, 0x0C, &hex!("01 1E"), ExpectedLength::None);
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 A4 02 0C 02 01 1E"));

        // data longer than 255 bytes promotes to extended form
        let data = vec![0xAB; 300];
        let apdu = command(0x00, 0x2A, 0x00, 0xBE, &data, ExpectedLength::None);
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(&bytes[..7], hex!("00 2A 00 BE 00 01 2C"));
        assert_eq!(bytes.len(), 7 + 300);
    }

    #[test]
    fn test_case_4() {
        let apdu = command(0x00, 0x82, 0x00, 0x00, &[0x11; 40], ExpectedLength::Bytes(40));
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(&bytes[..5], hex!("00 82 00 00 28"));
        assert_eq!(bytes[bytes.len() - 1], 0x28);
        assert_eq!(bytes.len(), 5 + 40 + 1);

        // extended form has a two-byte Le without the extra marker byte
        let mut apdu = command(0x00, 0x86, 0x00, 0x00, &hex!("7C 00"), ExpectedLength::Max);
        apdu.extended = true;
        assert_eq!(apdu.to_bytes().unwrap(), hex!("00 86 00 00 00 00 02 7C 00 00 00"));
    }

    #[test]
    fn test_oversize_data() {
        let apdu = command(0x00, 0x2A, 0x00, 0xBE, &vec![0u8; 65536+1], ExpectedLength::None);
        assert!(matches!(apdu.to_bytes(), Err(EncodeError::DataTooLong { .. })));
    }

    #[test]
    fn test_response_parsing() {
        let response = ResponseApdu::from_bytes(&hex!("60 14 5F 01 90 00")).unwrap();
        assert_eq!(response.data, hex!("60 14 5F 01"));
        assert_eq!(response.sw, StatusWord(0x9000));
        assert!(response.sw.is_success());

        let response = ResponseApdu::from_bytes(&hex!("6A 82")).unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.sw.sw1(), 0x6A);
        assert_eq!(response.sw.sw2(), 0x82);

        assert_eq!(ResponseApdu::from_bytes(&[0x90]), None);
    }
}

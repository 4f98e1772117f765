//! Named ICAO commands issued over a card transport.
//!
//! [`MrtdService`] owns the [`CardTransport`] and an optional
//! [`SecureChannel`]; every command is wrapped and unwrapped by the channel
//! when one is installed. The service is also uniformly responsible for
//! wrapping the data objects of the MANAGE SECURITY ENVIRONMENT variants —
//! each entry point documents the tags it emits, the caller passes bare
//! values.


use std::fmt;

use rasn::types::Oid;
use tracing::{debug, instrument};

use crate::iso7816::apdu::{
    CommandApdu, CommandHeader, EncodeError, ExpectedLength, ResponseApdu, StatusWord,
    CLA_CHAINING,
};
use crate::iso7816::files::sw;
use crate::iso7816::transport::{CardTransport, TransportError};
use crate::secure_messaging::{self, SecureChannel};
use crate::tlv;


/// The number of certificate bytes sent per PSO block in chain mode.
const PSO_CHAIN_BLOCK_SIZE: usize = 223;


#[derive(Debug)]
pub enum Error {
    Transport(TransportError),
    Encode(EncodeError),
    /// The chip answered with an unexpected status word.
    Apdu { sw: StatusWord },
    FileNotFound,
    AccessDenied { sw: StatusWord },
    MalformedResponse,
    Tlv(tlv::Error),
    SecureMessaging(secure_messaging::Error),
    Unsupported { feature: &'static str },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e)
                => write!(f, "transport error: {}", e),
            Self::Encode(e)
                => write!(f, "APDU encoding error: {}", e),
            Self::Apdu { sw }
                => write!(f, "operation failed with status word {}", sw),
            Self::FileNotFound
                => write!(f, "file not found"),
            Self::AccessDenied { sw }
                => write!(f, "access to file denied (status word {})", sw),
            Self::MalformedResponse
                => write!(f, "malformed response"),
            Self::Tlv(e)
                => write!(f, "TLV error: {}", e),
            Self::SecureMessaging(e)
                => write!(f, "secure messaging error: {}", e),
            Self::Unsupported { feature }
                => write!(f, "unsupported: {}", feature),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Apdu { .. } => None,
            Self::FileNotFound => None,
            Self::AccessDenied { .. } => None,
            Self::MalformedResponse => None,
            Self::Tlv(e) => Some(e),
            Self::SecureMessaging(e) => Some(e),
            Self::Unsupported { .. } => None,
        }
    }
}
impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self { Self::Transport(value) }
}
impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self { Self::Encode(value) }
}
impl From<tlv::Error> for Error {
    fn from(value: tlv::Error) -> Self { Self::Tlv(value) }
}
impl From<secure_messaging::Error> for Error {
    fn from(value: secure_messaging::Error) -> Self { Self::SecureMessaging(value) }
}


pub struct MrtdService {
    transport: Box<dyn CardTransport>,
    channel: Option<SecureChannel>,
}
impl MrtdService {
    pub fn new(transport: Box<dyn CardTransport>) -> Self {
        Self {
            transport,
            channel: None,
        }
    }

    pub fn open(&mut self) -> Result<(), Error> {
        self.transport.open().map_err(Error::Transport)
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.channel = None;
        self.transport.close().map_err(Error::Transport)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn atr(&self) -> Result<Vec<u8>, Error> {
        self.transport.atr().map_err(Error::Transport)
    }

    /// Installs a secure channel; all subsequent commands are wrapped by it.
    /// Passing `None` returns the service to plain APDUs.
    pub fn set_channel(&mut self, channel: Option<SecureChannel>) {
        self.channel = channel;
    }

    pub fn channel(&self) -> Option<&SecureChannel> {
        self.channel.as_ref()
    }

    /// Removes and returns the current secure channel.
    pub fn take_channel(&mut self) -> Option<SecureChannel> {
        self.channel.take()
    }

    /// Sends a command APDU, applying secure messaging if a channel is
    /// installed, and parses the response.
    ///
    /// A secure-messaging failure on the response discards the channel: its
    /// send sequence counter can no longer be trusted to match the chip's.
    pub fn transmit(&mut self, command: &CommandApdu) -> Result<ResponseApdu, Error> {
        let request_bytes = match &mut self.channel {
            Some(channel) => {
                let protected = channel.wrap(command)?;
                protected.to_bytes()?
            },
            None => command.to_bytes()?,
        };

        debug!(command = ?command.header, protected = self.channel.is_some(), "transmitting APDU");
        let response_bytes = self.transport.transmit(&request_bytes)?;
        let raw_response = ResponseApdu::from_bytes(&response_bytes)
            .ok_or(Error::MalformedResponse)?;

        let unwrapped = match &mut self.channel {
            None => return Ok(raw_response),
            Some(_) if raw_response.data.is_empty() => {
                // the chip aborted secure messaging
                Err(secure_messaging::Error::MalformedResponse)
            },
            Some(channel) => channel.unwrap(&raw_response),
        };
        match unwrapped {
            Ok(response) => Ok(response),
            Err(e) => {
                // the counters cannot be trusted to match any more
                self.channel = None;
                Err(e.into())
            },
        }
    }

    /// Like [`Self::transmit`] but treats any status word other than 0x9000
    /// as an error.
    fn transmit_checked(&mut self, command: &CommandApdu) -> Result<ResponseApdu, Error> {
        let response = self.transmit(command)?;
        if !response.sw.is_success() {
            return Err(Error::Apdu { sw: response.sw });
        }
        Ok(response)
    }

    /// SELECT by application identifier: `00 A4 04 0C Lc aid`.
    #[instrument(skip(self))]
    pub fn select_applet(&mut self, aid: &[u8]) -> Result<(), Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0xA4, 0x04, 0x0C),
            aid.to_vec(),
            ExpectedLength::None,
        );
        self.transmit_checked(&command)?;
        Ok(())
    }

    /// SELECT by file identifier: `00 A4 02 0C 02 fid`.
    ///
    /// Maps the well-known status words to [`Error::FileNotFound`] and
    /// [`Error::AccessDenied`].
    #[instrument(skip(self))]
    pub fn select_file(&mut self, fid: u16) -> Result<(), Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0xA4, 0x02, 0x0C),
            fid.to_be_bytes().to_vec(),
            ExpectedLength::None,
        );
        let response = self.transmit(&command)?;
        match response.sw.0 {
            sw::NO_ERROR => Ok(()),
            sw::FILE_NOT_FOUND => Err(Error::FileNotFound),
            sw::SECURITY_STATUS_NOT_SATISFIED
            |sw::CONDITIONS_NOT_SATISFIED
            |sw::COMMAND_NOT_ALLOWED => Err(Error::AccessDenied { sw: response.sw }),
            _ => Err(Error::Apdu { sw: response.sw }),
        }
    }

    /// READ BINARY with a 15-bit offset: `00 B0 ofs_hi ofs_lo Le`.
    pub fn read_binary(&mut self, offset: u16, length: usize) -> Result<Vec<u8>, Error> {
        let [offset_hi, offset_lo] = offset.to_be_bytes();
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0xB0, offset_hi & 0x7F, offset_lo),
            Vec::new(),
            ExpectedLength::Bytes(length.min(256) as u32),
        );
        Ok(self.transmit_checked(&command)?.data)
    }

    /// READ BINARY with short-file-identifier addressing:
    /// `00 B0 (0x80|sfi) offset Le`. Selects the file as a side effect.
    pub fn read_binary_short_file(&mut self, short_file_id: u8, offset: u8, length: usize) -> Result<Vec<u8>, Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0xB0, 0x80 | (short_file_id & 0x1F), offset),
            Vec::new(),
            ExpectedLength::Bytes(length.min(256) as u32),
        );
        Ok(self.transmit_checked(&command)?.data)
    }

    /// READ BINARY with the odd instruction byte and a TLV-encoded offset:
    /// `00 B1 00 00 Lc 54 02 offset Le'`.
    ///
    /// The chip returns the file content wrapped under tag `0x53`; this
    /// method unwraps it. The expected length is widened by the worst-case
    /// overhead of that wrapping, capped at 256.
    pub fn read_binary_extended_offset(&mut self, offset: u16, length: usize) -> Result<Vec<u8>, Error> {
        let mut expected = length.min(256);
        if expected < 128 {
            expected += 2;
        } else if expected < 256 {
            expected += 3;
        }
        let expected = expected.min(256);

        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0xB1, 0x00, 0x00),
            tlv::wrap(0x54, &offset.to_be_bytes()),
            ExpectedLength::Bytes(expected as u32),
        );
        let response = self.transmit_checked(&command)?;

        let (tag, value, _rest) = tlv::take(&response.data)?;
        if tag != 0x53 {
            return Err(Error::MalformedResponse);
        }
        Ok(value.to_vec())
    }

    /// Selects an elementary file and reads it in full.
    ///
    /// The first read fetches the leading tag and length of the file's
    /// BER-TLV payload to learn the total size. Reads beyond the 15-bit
    /// offset range use the odd-instruction READ BINARY; a chip that rejects
    /// the plain READ BINARY outright is retried once the same way.
    #[instrument(skip(self))]
    pub fn read_ef(&mut self, fid: u16) -> Result<Vec<u8>, Error> {
        self.select_file(fid)?;

        let header = self.read_binary(0, 4)?;
        let (_tag, after_tag) = tlv::take_tag(&header)?;
        let (body_length, after_length) = tlv::take_length(after_tag)?;
        let header_length = header.len() - after_length.len();
        let total_length = header_length + body_length;

        let mut content = header;
        content.truncate(header_length.min(content.len()));
        while content.len() < total_length {
            let offset = content.len();
            if offset > 0xFFFF {
                return Err(Error::Unsupported { feature: "files larger than 65535 bytes" });
            }
            let chunk_length = (total_length - content.len()).min(256);
            let chunk = if offset > 0x7FFF {
                self.read_binary_extended_offset(offset as u16, chunk_length)?
            } else {
                match self.read_binary(offset as u16, chunk_length) {
                    Ok(chunk) => chunk,
                    // some chips only implement the odd-instruction variant
                    Err(Error::Apdu { .. }) => self.read_binary_extended_offset(offset as u16, chunk_length)?,
                    Err(e) => return Err(e),
                }
            };
            if chunk.is_empty() {
                return Err(Error::MalformedResponse);
            }
            content.extend(&chunk);
        }
        content.truncate(total_length);
        Ok(content)
    }

    /// GET CHALLENGE: `00 84 00 00 08`.
    #[instrument(skip(self))]
    pub fn get_challenge(&mut self) -> Result<[u8; 8], Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0x84, 0x00, 0x00),
            Vec::new(),
            ExpectedLength::Bytes(8),
        );
        let response = self.transmit_checked(&command)?;
        response.data.as_slice().try_into()
            .map_err(|_| Error::MalformedResponse)
    }

    /// INTERNAL AUTHENTICATE with the terminal's challenge (Active
    /// Authentication): `00 88 00 00 08 rnd_ifd 00`.
    #[instrument(skip_all)]
    pub fn internal_authenticate(&mut self, rnd_ifd: &[u8; 8]) -> Result<Vec<u8>, Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0x88, 0x00, 0x00),
            rnd_ifd.to_vec(),
            ExpectedLength::Max,
        );
        Ok(self.transmit_checked(&command)?.data)
    }

    /// EXTERNAL AUTHENTICATE with the BAC cryptogram, expecting the chip's
    /// 40-byte cryptogram back.
    ///
    /// The expected length is first given as 40; some chips reject that, so a
    /// single retry with the maximum expected length follows.
    #[instrument(skip_all)]
    pub fn external_authenticate_mutual(&mut self, cryptogram: &[u8; 40]) -> Result<[u8; 40], Error> {
        let mut command = CommandApdu::new(
            CommandHeader::new(0x00, 0x82, 0x00, 0x00),
            cryptogram.to_vec(),
            ExpectedLength::Bytes(40),
        );
        let mut response = self.transmit(&command)?;
        if !response.sw.is_success() {
            debug!(sw = %response.sw, "EXTERNAL AUTHENTICATE rejected with Le 40, retrying with maximum");
            command.expected = ExpectedLength::Max;
            response = self.transmit(&command)?;
            if !response.sw.is_success() {
                return Err(Error::Apdu { sw: response.sw });
            }
        }
        response.data.as_slice().try_into()
            .map_err(|_| Error::MalformedResponse)
    }

    /// EXTERNAL AUTHENTICATE with the terminal's signature (Terminal
    /// Authentication): `00 82 00 00 Lc signature`.
    #[instrument(skip_all)]
    pub fn external_authenticate_terminal(&mut self, signature: &[u8]) -> Result<(), Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0x82, 0x00, 0x00),
            signature.to_vec(),
            ExpectedLength::None,
        );
        self.transmit_checked(&command)?;
        Ok(())
    }

    fn manage_security_environment(&mut self, p1: u8, p2: u8, data: Vec<u8>) -> Result<(), Error> {
        let command = CommandApdu::new(
            CommandHeader::new(0x00, 0x22, p1, p2),
            data,
            ExpectedLength::None,
        );
        self.transmit_checked(&command)?;
        Ok(())
    }

    /// MSE:Set DST (`00 22 81 B6`) with a public key reference.
    ///
    /// Emits the reference under tag `0x83`.
    #[instrument(skip_all)]
    pub fn mse_set_dst(&mut self, public_key_reference: &[u8]) -> Result<(), Error> {
        self.manage_security_environment(0x81, 0xB6, tlv::wrap(0x83, public_key_reference))
    }

    /// MSE:Set AT for Terminal Authentication (`00 22 81 A4`) with the
    /// terminal's certificate holder reference.
    ///
    /// Emits the reference under tag `0x83`.
    #[instrument(skip_all)]
    pub fn mse_set_at_terminal_auth(&mut self, certificate_holder_reference: &[u8]) -> Result<(), Error> {
        self.manage_security_environment(0x81, 0xA4, tlv::wrap(0x83, certificate_holder_reference))
    }

    /// MSE:Set AT for Chip Authentication (`00 22 41 A4`).
    ///
    /// Emits the protocol OID under tag `0x80` and the optional private key
    /// identifier under tag `0x84`.
    #[instrument(skip_all)]
    pub fn mse_set_at_chip_auth(&mut self, protocol: &Oid, key_id: Option<&[u8]>) -> Result<(), Error> {
        let mut data = Vec::new();
        tlv::append_wrapped(&mut data, 0x80, &tlv::oid_value(protocol));
        if let Some(key_id) = key_id {
            tlv::append_wrapped(&mut data, 0x84, key_id);
        }
        self.manage_security_environment(0x41, 0xA4, data)
    }

    /// MSE:Set AT for PACE (`00 22 C1 A4`).
    ///
    /// Emits the protocol OID under tag `0x80`, the password reference under
    /// tag `0x83` and the optional standardized domain parameter id under tag
    /// `0x84`.
    #[instrument(skip_all)]
    pub fn mse_set_at_pace(&mut self, protocol: &Oid, password_reference: u8, parameter_id: Option<&[u8]>) -> Result<(), Error> {
        let mut data = Vec::new();
        tlv::append_wrapped(&mut data, 0x80, &tlv::oid_value(protocol));
        tlv::append_wrapped(&mut data, 0x83, &[password_reference]);
        if let Some(parameter_id) = parameter_id {
            tlv::append_wrapped(&mut data, 0x84, parameter_id);
        }
        self.manage_security_environment(0xC1, 0xA4, data)
    }

    /// MSE:Set KAT (`00 22 41 A6`) with the terminal's ephemeral key for
    /// Chip Authentication.
    ///
    /// Emits the key under tag `0x91` and the optional key identifier under
    /// tag `0x84`.
    #[instrument(skip_all)]
    pub fn mse_set_kat(&mut self, ephemeral_key: &[u8], key_id: Option<&[u8]>) -> Result<(), Error> {
        let mut data = Vec::new();
        tlv::append_wrapped(&mut data, 0x91, ephemeral_key);
        if let Some(key_id) = key_id {
            tlv::append_wrapped(&mut data, 0x84, key_id);
        }
        self.manage_security_environment(0x41, 0xA6, data)
    }

    /// GENERAL AUTHENTICATE with dynamic authentication data.
    ///
    /// The data is wrapped under tag `0x7C` on the way out and unwrapped from
    /// the same tag on the way in. Commands are chained (`CLA |= 0x10`) until
    /// `last` is set.
    #[instrument(skip(self, data))]
    pub fn general_authenticate(&mut self, data: &[u8], last: bool) -> Result<Vec<u8>, Error> {
        let cla = if last { 0x00 } else { CLA_CHAINING };
        let command = CommandApdu::new(
            CommandHeader::new(cla, 0x86, 0x00, 0x00),
            tlv::wrap(0x7C, data),
            ExpectedLength::Max,
        );
        let response = self.transmit_checked(&command)?;
        Ok(tlv::unwrap(0x7C, &response.data)?.to_vec())
    }

    /// PSO:Verify Certificate (`00 2A 00 BE`) in chain mode.
    ///
    /// Certificates longer than one block are sent in 223-byte blocks with
    /// the chaining CLA on all but the last.
    #[instrument(skip_all)]
    pub fn verify_certificate(&mut self, certificate: &[u8]) -> Result<(), Error> {
        let mut blocks = certificate.chunks(PSO_CHAIN_BLOCK_SIZE).peekable();
        while let Some(block) = blocks.next() {
            let cla = if blocks.peek().is_some() { CLA_CHAINING } else { 0x00 };
            let command = CommandApdu::new(
                CommandHeader::new(cla, 0x2A, 0x00, 0xBE),
                block.to_vec(),
                ExpectedLength::None,
            );
            self.transmit_checked(&command)?;
        }
        Ok(())
    }
}

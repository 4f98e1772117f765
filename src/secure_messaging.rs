//! Secure messaging: the encrypted and authenticated session channel.
//!
//! After BAC, PACE or Chip Authentication succeeds, every APDU is wrapped into
//! a protected APDU: the command data moves into an encrypted data object
//! (`0x87`, or `0x85` for odd instructions), the expected length into `0x97`,
//! and a MAC over the send sequence counter, the modified header and those
//! objects is appended as `0x8E`. Responses carry their payload in `0x87`,
//! their status word in `0x99` and the MAC in `0x8E`.
//!
//! A [`SecureChannel`] is bound to one cipher and one pair of session keys for
//! its entire lifetime; re-keying means building a new channel. Its two
//! operations, [`wrap`](SecureChannel::wrap) and
//! [`unwrap`](SecureChannel::unwrap), must be called strictly alternately —
//! each call increments the send sequence counter once, and a skipped or
//! repeated call leaves the counter out of step with the chip for the rest of
//! the session.


use std::fmt;

use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::cipher_mac::{
    pad, unpad, Cam3Des, CamAes128, CamAes192, CamAes256, CipherAndMac,
};
use crate::crypt::CryptoError;
use crate::iso7816::apdu::{
    CommandApdu, ExpectedLength, ResponseApdu, StatusWord, CLA_SECURE_MESSAGING,
};
use crate::tlv;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    MalformedResponse,
    MissingResponseMac,
    MacMismatch,
    MissingResponseStatus,
    StatusLength { obtained: usize },
    UnknownPaddingIndicator { indicator: u8 },
    InvalidPadding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedResponse
                => write!(f, "protected response has an invalid structure"),
            Self::MissingResponseMac
                => write!(f, "protected response does not contain a MAC"),
            Self::MacMismatch
                => write!(f, "response MAC incorrect"),
            Self::MissingResponseStatus
                => write!(f, "protected response does not contain a status word"),
            Self::StatusLength { obtained }
                => write!(f, "protected status word has unexpected length {}", obtained),
            Self::UnknownPaddingIndicator { indicator }
                => write!(f, "response payload has unknown padding indicator {}", indicator),
            Self::InvalidPadding
                => write!(f, "response payload has invalid padding"),
        }
    }
}
impl std::error::Error for Error {
}


/// The symmetric cipher suite of a session.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChannelCipher {
    TripleDes,
    Aes128,
    Aes192,
    Aes256,
}
impl ChannelCipher {
    pub fn cam(&self) -> &'static dyn CipherAndMac {
        match self {
            Self::TripleDes => &Cam3Des,
            Self::Aes128 => &CamAes128,
            Self::Aes192 => &CamAes192,
            Self::Aes256 => &CamAes256,
        }
    }

    /// The cipher's block size, which is also the width of the send sequence
    /// counter.
    pub fn block_size(&self) -> usize {
        self.cam().cipher_block_size()
    }

    pub fn key_size(&self) -> usize {
        self.cam().cipher_key_size()
    }
}


/// An established secure-messaging session.
#[derive(ZeroizeOnDrop)]
pub struct SecureChannel {
    #[zeroize(skip)] cipher: ChannelCipher,
    k_enc: Vec<u8>,
    k_mac: Vec<u8>,
    send_sequence_counter: Vec<u8>,
}
impl SecureChannel {
    /// Creates a channel whose send sequence counter starts at zero.
    pub fn new(cipher: ChannelCipher, k_enc: &[u8], k_mac: &[u8]) -> Result<Self, CryptoError> {
        let initial_counter = vec![0u8; cipher.block_size()];
        Self::with_send_sequence_counter(cipher, k_enc, k_mac, &initial_counter)
    }

    /// Creates a channel with an explicit initial send sequence counter,
    /// left-padded to the cipher's block size if necessary.
    pub fn with_send_sequence_counter(cipher: ChannelCipher, k_enc: &[u8], k_mac: &[u8], send_sequence_counter: &[u8]) -> Result<Self, CryptoError> {
        if k_enc.len() != cipher.key_size() {
            return Err(CryptoError::KeyLength { obtained: k_enc.len(), expected: cipher.key_size() });
        }
        if k_mac.len() != cipher.key_size() {
            return Err(CryptoError::KeyLength { obtained: k_mac.len(), expected: cipher.key_size() });
        }
        if send_sequence_counter.len() > cipher.block_size() {
            return Err(CryptoError::KeyLength {
                obtained: send_sequence_counter.len(),
                expected: cipher.block_size(),
            });
        }

        let mut counter = vec![0u8; cipher.block_size()];
        counter[cipher.block_size() - send_sequence_counter.len()..]
            .copy_from_slice(send_sequence_counter);
        Ok(Self {
            cipher,
            k_enc: k_enc.to_vec(),
            k_mac: k_mac.to_vec(),
            send_sequence_counter: counter,
        })
    }

    pub fn cipher(&self) -> ChannelCipher {
        self.cipher
    }

    /// The current value of the send sequence counter.
    pub fn send_sequence_counter(&self) -> &[u8] {
        &self.send_sequence_counter
    }

    /// Adds one to the big-endian send sequence counter, wrapping around at
    /// its width.
    fn increment_send_sequence_counter(&mut self) {
        for b in self.send_sequence_counter.iter_mut().rev() {
            if *b == 0xFF {
                *b = 0x00;
                // carry; keep going
            } else {
                *b += 1;
                break;
            }
        }
    }

    /// The CBC IV for the current counter value: all zeroes for 3DES, the
    /// encrypted counter block for AES (Doc 9303 Part 11 §9.8.6.3).
    fn derive_iv(&self) -> Zeroizing<Vec<u8>> {
        let mut iv = Zeroizing::new(vec![0u8; self.cipher.block_size()]);
        if !matches!(self.cipher, ChannelCipher::TripleDes) {
            let zero_iv = vec![0u8; self.cipher.block_size()];
            iv.copy_from_slice(&self.send_sequence_counter);
            self.cipher.cam().encrypt_padded_data(&mut iv, &self.k_enc, &zero_iv);
        }
        iv
    }

    /// Wraps a plain command APDU into a protected one.
    ///
    /// Increments the send sequence counter once; the matching
    /// [`Self::unwrap`] of the response must follow before the next wrap.
    pub fn wrap(&mut self, command: &CommandApdu) -> Result<CommandApdu, Error> {
        let cam = self.cipher.cam();
        let block_size = cam.cipher_block_size();

        self.increment_send_sequence_counter();

        // the protected header is authenticated alongside the data objects
        let mut header = command.header;
        header.cla |= CLA_SECURE_MESSAGING;

        let mut mac_data = Zeroizing::new(Vec::new());
        mac_data.extend(&self.send_sequence_counter);
        mac_data.extend(header.to_bytes());
        pad(&mut mac_data, block_size);

        let mut body = Zeroizing::new(Vec::new());

        if !command.data.is_empty() {
            let mut plaintext = Zeroizing::new(command.data.clone());
            pad(&mut plaintext, block_size);
            let iv = self.derive_iv();
            cam.encrypt_padded_data(&mut plaintext, &self.k_enc, &iv);

            if command.header.ins & 1 == 0 {
                // data object 87: padding indicator 01, then the ciphertext
                let mut value = Zeroizing::new(Vec::with_capacity(1 + plaintext.len()));
                value.push(0x01);
                value.extend(plaintext.iter());
                tlv::append_wrapped(&mut body, 0x87, &value);
            } else {
                // odd instructions use data object 85 without an indicator
                tlv::append_wrapped(&mut body, 0x85, &plaintext);
            }
        }

        match command.expected {
            ExpectedLength::None => {},
            ExpectedLength::Bytes(n) => {
                if n <= 256 {
                    tlv::append_wrapped(&mut body, 0x97, &[(n & 0xFF) as u8]);
                } else {
                    let le = if n == 65536 { 0u16 } else { n as u16 };
                    tlv::append_wrapped(&mut body, 0x97, &le.to_be_bytes());
                }
            },
            ExpectedLength::Max => {
                if command.extended {
                    tlv::append_wrapped(&mut body, 0x97, &[0x00, 0x00]);
                } else {
                    tlv::append_wrapped(&mut body, 0x97, &[0x00]);
                }
            },
        }

        mac_data.extend(body.iter());
        pad(&mut mac_data, block_size);
        let mac = cam.mac_padded_data(&mac_data, &self.k_mac);
        tlv::append_wrapped(&mut body, 0x8E, &mac);

        let mut protected = CommandApdu::new(header, body.to_vec(), ExpectedLength::Max);
        protected.extended = command.extended || protected.data.len() > 255;
        Ok(protected)
    }

    /// Unwraps a protected response APDU.
    ///
    /// Increments the send sequence counter once, verifies the MAC, then
    /// decrypts the payload. A MAC mismatch leaves the channel unusable; the
    /// caller must discard it and reauthenticate.
    pub fn unwrap(&mut self, response: &ResponseApdu) -> Result<ResponseApdu, Error> {
        let cam = self.cipher.cam();
        let block_size = cam.cipher_block_size();

        self.increment_send_sequence_counter();

        // split the response into data objects, keeping the raw bytes of the
        // odd-tagged ones for MAC verification
        let mut authenticated_raw: Vec<&[u8]> = Vec::new();
        let mut payload: Option<(u16, &[u8])> = None;
        let mut status: Option<&[u8]> = None;
        let mut received_mac: Option<&[u8]> = None;

        let mut remaining = response.data.as_slice();
        while !remaining.is_empty() {
            let (tag, value, rest) = tlv::take(remaining)
                .map_err(|_| Error::MalformedResponse)?;
            let raw = &remaining[..remaining.len() - rest.len()];
            remaining = rest;

            match tag {
                0x8E => received_mac = Some(value),
                0x87|0x85 => {
                    authenticated_raw.push(raw);
                    payload = Some((tag, value));
                },
                0x99 => {
                    authenticated_raw.push(raw);
                    status = Some(value);
                },
                _ => {
                    if tag & 1 != 0 {
                        authenticated_raw.push(raw);
                    }
                },
            }
        }

        let received_mac = received_mac.ok_or(Error::MissingResponseMac)?;

        let mut mac_data = Zeroizing::new(Vec::new());
        mac_data.extend(&self.send_sequence_counter);
        for raw in &authenticated_raw {
            mac_data.extend(*raw);
        }
        pad(&mut mac_data, block_size);
        if !cam.verify_mac_padded_data(&mac_data, &self.k_mac, received_mac) {
            return Err(Error::MacMismatch);
        }

        let data = match payload {
            None => Vec::with_capacity(0),
            Some((tag, value)) => {
                let ciphertext = if tag == 0x87 {
                    let indicator = *value.first().ok_or(Error::MalformedResponse)?;
                    if indicator != 0x01 {
                        return Err(Error::UnknownPaddingIndicator { indicator });
                    }
                    &value[1..]
                } else {
                    value
                };
                if ciphertext.is_empty() || ciphertext.len() % block_size != 0 {
                    return Err(Error::MalformedResponse);
                }

                let mut plaintext = Zeroizing::new(ciphertext.to_vec());
                let iv = self.derive_iv();
                cam.decrypt_padded_data(&mut plaintext, &self.k_enc, &iv);
                unpad(&plaintext).ok_or(Error::InvalidPadding)?.to_vec()
            },
        };

        let status = status.ok_or(Error::MissingResponseStatus)?;
        if status.len() != 2 {
            return Err(Error::StatusLength { obtained: status.len() });
        }

        Ok(ResponseApdu {
            data,
            sw: StatusWord::new(status[0], status[1]),
        })
    }
}

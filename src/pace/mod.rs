//! Password Authenticated Connection Establishment (PACE version 2).
//!
//! The terminal and chip run a chain of GENERAL AUTHENTICATE commands: the
//! chip sends a nonce encrypted under the password-derived key, both sides
//! map the nonce into ephemeral domain parameters (generic, integrated or
//! chip-authentication mapping), agree on a shared secret with ephemeral
//! keys, and confirm each other with MACed authentication tokens. Success
//! yields fresh session keys and a new secure channel.


pub mod card_access;
pub mod oids;


use std::fmt;

use crypto_bigint::BoxedUint;
use rand::rngs::OsRng;
use rand::RngCore;
use rasn::types::Oid;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::crypt::cipher_mac::{pad, unpad, CipherAndMac};
use crate::crypt::{boxed_uint_from_be_slice, CryptoError, DigestAlgorithm, KeyAgreement};
use crate::iso7816::apdu::StatusWord;
use crate::mrz::MrzKey;
use crate::secure_messaging::{ChannelCipher, SecureChannel};
use crate::service::{self, MrtdService};
use crate::tlv;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Mapping {
    Generic,
    Integrated,
    ChipAuthentication,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AgreementAlgorithm {
    DiffieHellman,
    EllipticDiffieHellman,
}


#[derive(Debug)]
pub enum Error {
    Service(service::Error),
    Crypto(CryptoError),
    Tlv(tlv::Error),
    /// The object identifier does not name a known PACE protocol.
    UnknownProtocol,
    /// The domain parameters do not fit the protocol's key agreement
    /// algorithm.
    ParameterMismatch,
    /// The chip rejected a protocol step.
    Failed { sw: Option<StatusWord> },
    MalformedResponse,
    /// The chip echoed the terminal's own ephemeral public key.
    EqualEphemeralKeys,
    /// The chip's authentication token did not verify.
    TokenMismatch,
    /// The chip performed chip-authentication mapping but sent no encrypted
    /// chip-authentication data.
    MissingChipAuthenticationData,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(e)
                => write!(f, "service error: {}", e),
            Self::Crypto(e)
                => write!(f, "cryptography error: {}", e),
            Self::Tlv(e)
                => write!(f, "TLV error: {}", e),
            Self::UnknownProtocol
                => write!(f, "unknown PACE protocol"),
            Self::ParameterMismatch
                => write!(f, "domain parameters do not match the protocol"),
            Self::Failed { sw: Some(sw) }
                => write!(f, "PACE failed with status word {}", sw),
            Self::Failed { sw: None }
                => write!(f, "PACE failed"),
            Self::MalformedResponse
                => write!(f, "malformed PACE response"),
            Self::EqualEphemeralKeys
                => write!(f, "chip and terminal ephemeral public keys are equal"),
            Self::TokenMismatch
                => write!(f, "chip authentication token mismatched"),
            Self::MissingChipAuthenticationData
                => write!(f, "chip authentication data missing from final response"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::Tlv(e) => Some(e),
            _ => None,
        }
    }
}
impl From<service::Error> for Error {
    fn from(value: service::Error) -> Self {
        // a rejected protocol APDU is a PACE failure carrying the chip's
        // status word
        match value {
            service::Error::Apdu { sw } => Self::Failed { sw: Some(sw) },
            other => Self::Service(other),
        }
    }
}
impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self { Self::Crypto(value) }
}
impl From<tlv::Error> for Error {
    fn from(value: tlv::Error) -> Self { Self::Tlv(value) }
}


/// The password the static PACE key is derived from.
///
/// The variant determines the password reference sent in MSE:Set AT
/// (BSI TR-03110 B.11.1) and the seed fed into the password KDF.
pub enum Password {
    Mrz(MrzKey),
    CardAccessNumber(String),
    Pin(String),
    Puk(String),
}
impl Password {
    pub fn key_reference(&self) -> u8 {
        match self {
            Self::Mrz(_) => 0x01,
            Self::CardAccessNumber(_) => 0x02,
            Self::Pin(_) => 0x03,
            Self::Puk(_) => 0x04,
        }
    }

    /// The KDF input: the full SHA-1 of the MRZ information, or the password
    /// characters themselves for CAN, PIN and PUK.
    pub fn key_seed(&self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Mrz(key) => Zeroizing::new(key.pace_key_seed().to_vec()),
            Self::CardAccessNumber(s)|Self::Pin(s)|Self::Puk(s)
                => Zeroizing::new(s.as_bytes().to_vec()),
        }
    }
}


/// The algorithm suite encoded in a PACE protocol object identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProtocolParameters {
    pub mapping: Mapping,
    pub agreement: AgreementAlgorithm,
    pub cipher: ChannelCipher,
    pub digest: DigestAlgorithm,
    /// Length of the session cipher key in bits.
    pub key_length: usize,
}
impl ProtocolParameters {
    /// Decodes a PACE object identifier per the table in
    /// Doc 9303 Part 11 §9.2.3.
    pub fn from_oid(protocol: &Oid) -> Option<Self> {
        let arcs: &[u32] = protocol;
        let suffix = arcs.strip_prefix(&**oids::PACE_OID_PREFIX)?;
        let &[family, suite] = suffix else {
            return None;
        };

        let (mapping, agreement) = match family {
            1 => (Mapping::Generic, AgreementAlgorithm::DiffieHellman),
            2 => (Mapping::Generic, AgreementAlgorithm::EllipticDiffieHellman),
            3 => (Mapping::Integrated, AgreementAlgorithm::DiffieHellman),
            4 => (Mapping::Integrated, AgreementAlgorithm::EllipticDiffieHellman),
            6 => (Mapping::ChipAuthentication, AgreementAlgorithm::EllipticDiffieHellman),
            _ => return None,
        };
        let (cipher, digest, key_length) = match suite {
            1 => (ChannelCipher::TripleDes, DigestAlgorithm::Sha1, 112),
            2 => (ChannelCipher::Aes128, DigestAlgorithm::Sha1, 128),
            3 => (ChannelCipher::Aes192, DigestAlgorithm::Sha256, 192),
            4 => (ChannelCipher::Aes256, DigestAlgorithm::Sha256, 256),
            _ => return None,
        };
        if mapping == Mapping::ChipAuthentication && cipher == ChannelCipher::TripleDes {
            // CAM is only assigned with AES suites
            return None;
        }

        Some(Self {
            mapping,
            agreement,
            cipher,
            digest,
            key_length,
        })
    }

    fn matches_agreement(&self, agreement: &KeyAgreement) -> bool {
        match (self.agreement, agreement) {
            (AgreementAlgorithm::DiffieHellman, KeyAgreement::DiffieHellman(_)) => true,
            (AgreementAlgorithm::EllipticDiffieHellman, KeyAgreement::EllipticDiffieHellman(_)) => true,
            _ => false,
        }
    }
}


/// The artifacts of a successful PACE run.
///
/// The secure channel itself is installed into the service.
pub struct PaceResult {
    pub parameters: ProtocolParameters,
    /// The static domain parameters the run started from.
    pub static_agreement: KeyAgreement,
    /// The decrypted chip nonce `s`.
    pub picc_nonce: Zeroizing<Vec<u8>>,
    /// The mapped ephemeral domain parameters.
    pub ephemeral_agreement: KeyAgreement,
    /// The terminal's serialized ephemeral public key.
    pub pcd_public_key: Vec<u8>,
    /// The chip's serialized ephemeral public key.
    pub picc_public_key: Vec<u8>,
    /// The shared secret of the ephemeral key agreement.
    pub shared_secret: Zeroizing<Vec<u8>>,
    /// The decrypted chip-authentication data (chip-authentication mapping
    /// only).
    pub chip_authentication_data: Option<Vec<u8>>,
}


/// Runs PACE with fresh random keys and installs the resulting secure
/// channel into the service.
#[instrument(skip_all)]
pub fn establish(
    service: &mut MrtdService,
    protocol: &Oid,
    static_agreement: KeyAgreement,
    password: &Password,
    parameter_id: Option<u8>,
) -> Result<PaceResult, Error> {
    let parameters = ProtocolParameters::from_oid(protocol)
        .ok_or(Error::UnknownProtocol)?;

    let mapping_secret = static_agreement.generate_private_key();
    let agreement_secret = static_agreement.generate_private_key();
    let terminal_nonce = if parameters.mapping == Mapping::Integrated {
        let mut nonce = Zeroizing::new(vec![0u8; parameters.cipher.key_size()]);
        OsRng.fill_bytes(&mut nonce);
        Some(nonce)
    } else {
        None
    };

    establish_from_values(
        service,
        protocol,
        static_agreement,
        password,
        parameter_id,
        &mapping_secret,
        terminal_nonce.as_ref().map(|nonce| nonce.as_slice()),
        &agreement_secret,
    )
}

/// Runs PACE with explicit ephemeral key material.
///
/// `mapping_secret` is the private key of the mapping key agreement (unused
/// for integrated mapping, which uses `terminal_nonce` instead);
/// `agreement_secret` is the private key of the ephemeral key agreement.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub fn establish_from_values(
    service: &mut MrtdService,
    protocol: &Oid,
    static_agreement: KeyAgreement,
    password: &Password,
    parameter_id: Option<u8>,
    mapping_secret: &BoxedUint,
    terminal_nonce: Option<&[u8]>,
    agreement_secret: &BoxedUint,
) -> Result<PaceResult, Error> {
    let parameters = ProtocolParameters::from_oid(protocol)
        .ok_or(Error::UnknownProtocol)?;
    if !parameters.matches_agreement(&static_agreement) {
        return Err(Error::ParameterMismatch);
    }
    let cam = parameters.cipher.cam();

    // select the protocol and password
    let parameter_id_bytes = parameter_id.map(|id| [id]);
    service.mse_set_at_pace(
        protocol,
        password.key_reference(),
        parameter_id_bytes.as_ref().map(|id| id.as_slice()),
    )?;

    // step 1: obtain the encrypted nonce and decrypt it with the password key
    let step1 = service.general_authenticate(&[], false)?;
    let encrypted_nonce = tlv::unwrap(0x80, &step1)?;
    if encrypted_nonce.is_empty() || encrypted_nonce.len() % cam.cipher_block_size() != 0 {
        return Err(Error::MalformedResponse);
    }

    let k_pi = cam.derive_key_from_password(&password.key_seed());
    let mut picc_nonce = Zeroizing::new(encrypted_nonce.to_vec());
    let zero_iv = vec![0u8; cam.cipher_block_size()];
    cam.decrypt_padded_data(&mut picc_nonce, &k_pi, &zero_iv);

    // step 2: map the nonce into ephemeral domain parameters
    let ephemeral_agreement = match parameters.mapping {
        Mapping::Generic|Mapping::ChipAuthentication => {
            let mapping_public = static_agreement.calculate_public_key(mapping_secret);
            let step2 = service.general_authenticate(&tlv::wrap(0x81, &mapping_public), false)?;
            let picc_mapping_public = tlv::unwrap(0x82, &step2)?;

            let nonce_number = Zeroizing::new(boxed_uint_from_be_slice(&picc_nonce));
            static_agreement.derive_generic_mapping(&nonce_number, mapping_secret, picc_mapping_public)?
        },
        Mapping::Integrated => {
            let terminal_nonce = terminal_nonce.ok_or(Error::ParameterMismatch)?;
            let step2 = service.general_authenticate(&tlv::wrap(0x81, terminal_nonce), false)?;
            // the chip's mapping data object is empty by specification
            tlv::unwrap(0x82, &step2)?;

            let pseudorandom = cam.integrated_mapping_pseudorandom_function(
                &picc_nonce,
                terminal_nonce,
                static_agreement.prime(),
            );
            static_agreement.derive_integrated_mapping(&pseudorandom)?
        },
    };

    // step 3: ephemeral key agreement on the mapped parameters
    let pcd_public_key = ephemeral_agreement.calculate_public_key(agreement_secret);
    let step3 = service.general_authenticate(&tlv::wrap(0x83, &pcd_public_key), false)?;
    let picc_public_key = tlv::unwrap(0x84, &step3)?.to_vec();
    if picc_public_key == *pcd_public_key {
        return Err(Error::EqualEphemeralKeys);
    }
    let shared_secret = ephemeral_agreement.exchange_keys(agreement_secret, &picc_public_key)?;

    let k_enc = cam.derive_encryption_key(&shared_secret);
    let k_mac = cam.derive_mac_key(&shared_secret);

    // step 4: exchange and verify authentication tokens
    let pcd_token = authentication_token(cam, protocol, &ephemeral_agreement, &picc_public_key, &k_mac);
    let step4 = service.general_authenticate(&tlv::wrap(0x85, &pcd_token), true)?;

    let mut picc_token = None;
    let mut encrypted_chip_authentication_data = None;
    let mut remaining = step4.as_slice();
    while !remaining.is_empty() {
        let (tag, value, rest) = tlv::take(remaining)?;
        match tag {
            0x86 => picc_token = Some(value),
            0x8A => encrypted_chip_authentication_data = Some(value),
            _ => {},
        }
        remaining = rest;
    }
    let picc_token = picc_token.ok_or(Error::MalformedResponse)?;

    let expected_token = authentication_token(cam, protocol, &ephemeral_agreement, &pcd_public_key, &k_mac);
    if !bool::from(picc_token.ct_eq(&expected_token)) {
        return Err(Error::TokenMismatch);
    }

    let chip_authentication_data = match parameters.mapping {
        Mapping::ChipAuthentication => {
            let encrypted = encrypted_chip_authentication_data
                .ok_or(Error::MissingChipAuthenticationData)?;
            Some(decrypt_chip_authentication_data(cam, &k_enc, encrypted)?)
        },
        _ => None,
    };

    // install the session channel; an AES session inherits the counter of a
    // pre-existing channel (deployed chips expect this), 3DES starts at zero
    let channel = match parameters.cipher {
        ChannelCipher::TripleDes => {
            SecureChannel::new(ChannelCipher::TripleDes, &k_enc, &k_mac)?
        },
        aes_cipher => {
            match service.take_channel() {
                Some(previous) => {
                    debug!("carrying send sequence counter over from previous channel");
                    SecureChannel::with_send_sequence_counter(
                        aes_cipher, &k_enc, &k_mac, previous.send_sequence_counter(),
                    )?
                },
                None => SecureChannel::new(aes_cipher, &k_enc, &k_mac)?,
            }
        },
    };
    service.set_channel(Some(channel));

    Ok(PaceResult {
        parameters,
        static_agreement,
        picc_nonce,
        ephemeral_agreement,
        pcd_public_key: pcd_public_key.to_vec(),
        picc_public_key,
        shared_secret,
        chip_authentication_data,
    })
}


/// The public key data object the authentication tokens are computed over:
/// `7F49 { 06 protocol-oid, 84/86 public-key }` (BSI TR-03110 D.3.4).
fn public_key_data_object(protocol: &Oid, agreement: &KeyAgreement, public_key: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    tlv::append_wrapped(&mut body, 0x06, &tlv::oid_value(protocol));
    tlv::append_wrapped(&mut body, agreement.public_key_do_tag(), public_key);
    tlv::wrap(0x7F49, &body)
}

/// The 8-byte authentication token over the other party's ephemeral public
/// key. Retail-MAC input is padded; CMAC input is not.
fn authentication_token(
    cam: &dyn CipherAndMac,
    protocol: &Oid,
    agreement: &KeyAgreement,
    public_key: &[u8],
    k_mac: &[u8],
) -> Zeroizing<Vec<u8>> {
    let mut input = Zeroizing::new(public_key_data_object(protocol, agreement, public_key));
    if cam.mac_block_size() > 1 {
        pad(&mut input, cam.mac_block_size());
    }
    cam.mac_padded_data(&input, k_mac)
}

/// Decrypts the chip-authentication data of PACE-CAM: AES-CBC under the
/// session encryption key with an all-ones IV (Doc 9303 Part 11 §4.4.3.5.2).
fn decrypt_chip_authentication_data(
    cam: &dyn CipherAndMac,
    k_enc: &[u8],
    encrypted: &[u8],
) -> Result<Vec<u8>, Error> {
    if encrypted.is_empty() || encrypted.len() % cam.cipher_block_size() != 0 {
        return Err(Error::MalformedResponse);
    }
    let iv = vec![0xFFu8; cam.cipher_block_size()];
    let mut plaintext = Zeroizing::new(encrypted.to_vec());
    cam.decrypt_padded_data(&mut plaintext, k_enc, &iv);
    Ok(unpad(&plaintext).ok_or(Error::MalformedResponse)?.to_vec())
}

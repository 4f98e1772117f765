//! Extended Access Control: Chip Authentication and Terminal Authentication.
//!
//! Chip Authentication replaces the BAC- or PACE-derived session with one
//! bound to the chip's static key pair from DG14, proving the chip is not a
//! clone. Terminal Authentication proves the terminal's access rights to the
//! chip through a card-verifiable certificate chain and a signature over a
//! chip-chosen challenge. Certificate validation and signing stay outside
//! this crate; the chain is taken as opaque certificate blobs and signing
//! goes through [`TerminalSigner`].


use std::fmt;

use crypto_bigint::BoxedUint;
use rasn::types::Oid;
use tracing::instrument;

use crate::crypt::{CryptoError, DigestAlgorithm, KeyAgreement};
use crate::pace::AgreementAlgorithm;
use crate::secure_messaging::{ChannelCipher, SecureChannel};
use crate::service::{self, MrtdService};


macro_rules! ca_oid {
    ($name:ident $(, $number:expr)* $(,)?) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 3 $(, $number)*]);
    };
}

/// Object identifiers of the Chip Authentication variants (`id-CA`).
pub mod oids {
    use rasn::types::Oid;

    ca_oid!(CA_OID_PREFIX);

    ca_oid!(CA_DH,                  1);
    ca_oid!(CA_DH_3DES_CBC_CBC,     1, 1);
    ca_oid!(CA_DH_AES_CBC_CMAC_128, 1, 2);
    ca_oid!(CA_DH_AES_CBC_CMAC_192, 1, 3);
    ca_oid!(CA_DH_AES_CBC_CMAC_256, 1, 4);

    ca_oid!(CA_ECDH,                    2);
    ca_oid!(CA_ECDH_3DES_CBC_CBC,       2, 1);
    ca_oid!(CA_ECDH_AES_CBC_CMAC_128,   2, 2);
    ca_oid!(CA_ECDH_AES_CBC_CMAC_192,   2, 3);
    ca_oid!(CA_ECDH_AES_CBC_CMAC_256,   2, 4);
}


#[derive(Debug)]
pub enum Error {
    Service(service::Error),
    Crypto(CryptoError),
    /// The object identifier does not name a known Chip Authentication
    /// protocol.
    UnknownProtocol,
    /// The domain parameters do not fit the protocol's key agreement
    /// algorithm.
    ParameterMismatch,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(e)
                => write!(f, "service error: {}", e),
            Self::Crypto(e)
                => write!(f, "cryptography error: {}", e),
            Self::UnknownProtocol
                => write!(f, "unknown Chip Authentication protocol"),
            Self::ParameterMismatch
                => write!(f, "domain parameters do not match the protocol"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::UnknownProtocol => None,
            Self::ParameterMismatch => None,
        }
    }
}
impl From<service::Error> for Error {
    fn from(value: service::Error) -> Self { Self::Service(value) }
}
impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self { Self::Crypto(value) }
}


/// The algorithm suite encoded in a Chip Authentication object identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CaParameters {
    pub agreement: AgreementAlgorithm,
    pub cipher: ChannelCipher,
    pub digest: DigestAlgorithm,
}
impl CaParameters {
    pub fn from_oid(protocol: &Oid) -> Option<Self> {
        let arcs: &[u32] = protocol;
        let suffix = arcs.strip_prefix(&**oids::CA_OID_PREFIX)?;
        let &[family, suite] = suffix else {
            return None;
        };

        let agreement = match family {
            1 => AgreementAlgorithm::DiffieHellman,
            2 => AgreementAlgorithm::EllipticDiffieHellman,
            _ => return None,
        };
        let (cipher, digest) = match suite {
            1 => (ChannelCipher::TripleDes, DigestAlgorithm::Sha1),
            2 => (ChannelCipher::Aes128, DigestAlgorithm::Sha1),
            3 => (ChannelCipher::Aes192, DigestAlgorithm::Sha256),
            4 => (ChannelCipher::Aes256, DigestAlgorithm::Sha256),
            _ => return None,
        };
        Some(Self {
            agreement,
            cipher,
            digest,
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


/// The artifacts of a successful Chip Authentication run.
///
/// The replacement secure channel is installed into the service.
pub struct CaResult {
    /// The chip key identifier, if the chip holds several key pairs.
    pub key_id: Option<Vec<u8>>,
    /// The chip's serialized static public key, as taken from DG14.
    pub picc_public_key: Vec<u8>,
    /// The terminal's serialized ephemeral public key.
    pub pcd_public_key: Vec<u8>,
    /// Digest of the terminal's ephemeral public key, retained for the
    /// passive-authentication cross-check.
    pub key_hash: Vec<u8>,
}


/// Runs Chip Authentication with a fresh ephemeral key and installs the
/// replacement secure channel into the service.
///
/// `agreement` carries the chip's domain parameters and `picc_public_key` its
/// static public key, both decoded from DG14 by the caller.
#[instrument(skip_all)]
pub fn chip_authentication(
    service: &mut MrtdService,
    protocol: &Oid,
    agreement: &KeyAgreement,
    picc_public_key: &[u8],
    key_id: Option<&[u8]>,
) -> Result<CaResult, Error> {
    let ephemeral_secret = agreement.generate_private_key();
    chip_authentication_from_values(service, protocol, agreement, picc_public_key, key_id, &ephemeral_secret)
}

/// Runs Chip Authentication with an explicit ephemeral private key.
#[instrument(skip_all)]
pub fn chip_authentication_from_values(
    service: &mut MrtdService,
    protocol: &Oid,
    agreement: &KeyAgreement,
    picc_public_key: &[u8],
    key_id: Option<&[u8]>,
    ephemeral_secret: &BoxedUint,
) -> Result<CaResult, Error> {
    let parameters = CaParameters::from_oid(protocol)
        .ok_or(Error::UnknownProtocol)?;
    if !parameters.matches_agreement(agreement) {
        return Err(Error::ParameterMismatch);
    }

    let pcd_public_key = agreement.calculate_public_key(ephemeral_secret);
    service.mse_set_kat(&pcd_public_key, key_id)?;

    let shared_secret = agreement.exchange_keys(ephemeral_secret, picc_public_key)?;

    let cam = parameters.cipher.cam();
    let k_enc = cam.derive_encryption_key(&shared_secret);
    let k_mac = cam.derive_mac_key(&shared_secret);
    let key_hash = parameters.digest.hash(&pcd_public_key);

    // the previous session ends here; the replacement channel counts from
    // zero
    let channel = SecureChannel::new(parameters.cipher, &k_enc, &k_mac)?;
    service.set_channel(Some(channel));

    Ok(CaResult {
        key_id: key_id.map(<[u8]>::to_vec),
        picc_public_key: picc_public_key.to_vec(),
        pcd_public_key: pcd_public_key.to_vec(),
        key_hash,
    })
}


/// Access to the terminal's private key, held outside this crate (typically
/// in an HSM or key store of the inspection system).
pub trait TerminalSigner {
    /// Signs the Terminal Authentication message
    /// `id_picc || rnd_icc || H(ephemeral public key)`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError>;
}


/// One link of the card-verifiable certificate chain.
pub struct CvCertificate<'a> {
    /// The certification authority reference naming the certificate's
    /// signer.
    pub authority_reference: &'a [u8],
    /// The encoded certificate body and signature, as sent to the chip.
    pub data: &'a [u8],
}


/// Runs Terminal Authentication over the established secure channel.
///
/// The chain must be ordered from the CVCA-issued certificate down to the
/// terminal certificate; `terminal_reference` is the holder reference of the
/// latter. `id_picc` is the chip identifier (the document number for BAC
/// sessions, the compressed ephemeral PACE key for PACE sessions) and
/// `pcd_ephemeral_public_key` the terminal's ephemeral Chip Authentication
/// key.
#[instrument(skip_all)]
pub fn terminal_authentication(
    service: &mut MrtdService,
    chain: &[CvCertificate<'_>],
    terminal_reference: &[u8],
    signer: &dyn TerminalSigner,
    digest: DigestAlgorithm,
    id_picc: &[u8],
    pcd_ephemeral_public_key: &[u8],
) -> Result<(), Error> {
    for certificate in chain {
        service.mse_set_dst(certificate.authority_reference)?;
        service.verify_certificate(certificate.data)?;
    }

    service.mse_set_at_terminal_auth(terminal_reference)?;

    let rnd_icc = service.get_challenge()?;

    let mut message = Vec::with_capacity(id_picc.len() + rnd_icc.len() + 32);
    message.extend(id_picc);
    message.extend(rnd_icc);
    message.extend(digest.hash(pcd_ephemeral_public_key));
    let signature = signer.sign(&message)?;

    service.external_authenticate_terminal(&signature)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::elliptic::curves::get_brainpool_p256r1;
    use crate::crypt::boxed_uint_from_be_slice;
    use crate::service::tests::ScriptedTransport;
    use hex_literal::hex;
    use std::cell::RefCell;

    // key material borrowed from the Doc 9303 Part 11 Appendix G.1 curve
    // examples: the "chip" static key and the terminal ephemeral key
    const PICC_PUBLIC: [u8; 65] = hex!("
        04
        824FBA91 C9CBE26B EF53A0EB E7342A3B
        F178CEA9 F45DE0B7 0AA60165 1FBA3F57
        30D8C879 AAA9C9F7 3991E61B 58F4D52E
        B87A0A0C 709A49DC 63719363 CCD13C54
    ");
    const PCD_PUBLIC: [u8; 65] = hex!("
        04
        7ACF3EFC 982EC455 65A4B155 129EFBC7
        4650DCBF A6362D89 6FC70262 E0C2CC5E
        544552DC B6725218 799115B5 5C9BAA6D
        9F6BC3A9 618E70C2 5AF71777 A9C4922D
    ");
    const PCD_SECRET: [u8; 32] = hex!("
        7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C
        F21F249D 953BC46F 4C6E1925 9C010F99
    ");

    #[test]
    fn test_chip_authentication() {
        let mut expected_mse_kat = hex!("00 22 41 A6 43 91 41").to_vec();
        expected_mse_kat.extend(PCD_PUBLIC);

        let transport = ScriptedTransport::new(vec![
            (expected_mse_kat, hex!("9000").to_vec()),
        ]);
        let mut service = MrtdService::new(Box::new(transport));

        let agreement = KeyAgreement::EllipticDiffieHellman(get_brainpool_p256r1());
        let ephemeral_secret = boxed_uint_from_be_slice(&PCD_SECRET);
        let result = chip_authentication_from_values(
            &mut service,
            oids::CA_ECDH_3DES_CBC_CBC,
            &agreement,
            &PICC_PUBLIC,
            None,
            &ephemeral_secret,
        ).unwrap();

        assert_eq!(result.pcd_public_key, PCD_PUBLIC);
        assert_eq!(result.picc_public_key, PICC_PUBLIC);
        assert_eq!(result.key_hash, DigestAlgorithm::Sha1.hash(&PCD_PUBLIC));
        assert!(result.key_id.is_none());

        // the replacement channel is 3DES with a zeroed counter
        let channel = service.channel().unwrap();
        assert_eq!(channel.cipher(), ChannelCipher::TripleDes);
        assert_eq!(channel.send_sequence_counter(), [0u8; 8]);
    }

    #[test]
    fn test_chip_authentication_rejects_mismatched_parameters() {
        let mut service = MrtdService::new(Box::new(ScriptedTransport::new(Vec::new())));
        let agreement = KeyAgreement::EllipticDiffieHellman(get_brainpool_p256r1());
        let result = chip_authentication_from_values(
            &mut service,
            oids::CA_DH_3DES_CBC_CBC,
            &agreement,
            &PICC_PUBLIC,
            None,
            &boxed_uint_from_be_slice(&PCD_SECRET),
        );
        assert!(matches!(result, Err(Error::ParameterMismatch)));
    }

    struct RecordingSigner {
        message: RefCell<Option<Vec<u8>>>,
    }
    impl TerminalSigner for RecordingSigner {
        fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
            *self.message.borrow_mut() = Some(message.to_vec());
            Ok(hex!("0102030405060708 090A0B0C0D0E0F10").to_vec())
        }
    }

    #[test]
    fn test_terminal_authentication() {
        let certificate = vec![0x7Fu8; 40];
        let authority_reference = b"DECVCA00001";
        let terminal_reference = b"DEIS00000001";
        let id_picc = hex!("AABBCCDD");
        let rnd_icc = hex!("0011223344556677");

        let mut expected_mse_dst = hex!("00 22 81 B6 0D 83 0B").to_vec();
        expected_mse_dst.extend(authority_reference);
        let mut expected_pso = hex!("00 2A 00 BE 28").to_vec();
        expected_pso.extend(&certificate);
        let mut expected_mse_at = hex!("00 22 81 A4 0E 83 0C").to_vec();
        expected_mse_at.extend(terminal_reference);
        let expected_get_challenge = hex!("00 84 00 00 08").to_vec();
        let expected_external_authenticate = hex!("
            00 82 00 00 10 0102030405060708 090A0B0C0D0E0F10
        ").to_vec();

        let mut challenge_response = rnd_icc.to_vec();
        challenge_response.extend(hex!("9000"));

        let transport = ScriptedTransport::new(vec![
            (expected_mse_dst, hex!("9000").to_vec()),
            (expected_pso, hex!("9000").to_vec()),
            (expected_mse_at, hex!("9000").to_vec()),
            (expected_get_challenge, challenge_response),
            (expected_external_authenticate, hex!("9000").to_vec()),
        ]);
        let mut service = MrtdService::new(Box::new(transport));

        let signer = RecordingSigner { message: RefCell::new(None) };
        terminal_authentication(
            &mut service,
            &[CvCertificate { authority_reference, data: &certificate }],
            terminal_reference,
            &signer,
            DigestAlgorithm::Sha1,
            &id_picc,
            &PCD_PUBLIC,
        ).unwrap();

        let mut expected_message = id_picc.to_vec();
        expected_message.extend(rnd_icc);
        expected_message.extend(DigestAlgorithm::Sha1.hash(&PCD_PUBLIC));
        assert_eq!(signer.message.borrow().as_deref(), Some(expected_message.as_slice()));
    }
}

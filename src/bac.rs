//! Basic Access Control.
//!
//! The legacy access-control protocol: terminal and chip prove knowledge of
//! the MRZ-derived 3DES keys to each other through an encrypted
//! challenge-response, then derive 3DES session keys from the two key
//! contributions. The initial send sequence counter is the concatenation of
//! the low halves of the two challenges.


use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::instrument;
use zeroize::Zeroizing;

use crate::crypt::cipher_mac::{pad, Cam3Des, CipherAndMac};
use crate::crypt::CryptoError;
use crate::mrz::MrzKey;
use crate::secure_messaging::{ChannelCipher, SecureChannel};
use crate::service::{self, MrtdService};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MismatchedValue {
    RndIcc,
    RndIfd,
}


#[derive(Debug)]
pub enum Error {
    Service(service::Error),
    Crypto(CryptoError),
    /// The chip's response cryptogram failed MAC verification.
    ResponseMac,
    /// A returned challenge did not match the one sent; the chip holds
    /// different keys.
    Denied { value: MismatchedValue },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(e)
                => write!(f, "service error: {}", e),
            Self::Crypto(e)
                => write!(f, "cryptography error: {}", e),
            Self::ResponseMac
                => write!(f, "response MAC incorrect"),
            Self::Denied { value }
                => write!(f, "mutual authentication denied: {:?} mismatched", value),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::ResponseMac => None,
            Self::Denied { .. } => None,
        }
    }
}
impl From<service::Error> for Error {
    fn from(value: service::Error) -> Self { Self::Service(value) }
}
impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self { Self::Crypto(value) }
}


/// Runs Basic Access Control with the given MRZ key and installs the
/// resulting 3DES secure channel into the service.
#[instrument(skip_all)]
pub fn establish(service: &mut MrtdService, key: &MrzKey) -> Result<(), Error> {
    let k_seed = key.bac_key_seed();

    let rnd_icc = service.get_challenge()?;

    let mut rnd_ifd = [0u8; 8];
    let mut k_ifd = Zeroizing::new([0u8; 16]);
    OsRng.fill_bytes(&mut rnd_ifd);
    OsRng.fill_bytes(k_ifd.as_mut());

    establish_from_values(service, k_seed.as_ref(), &rnd_icc, &rnd_ifd, &k_ifd)
}

/// Runs the mutual authentication with explicit challenge and key material.
///
/// [`establish`] feeds this with random values; tests feed it the worked
/// examples of Doc 9303 Part 11 Appendix D.
#[instrument(skip_all)]
pub fn establish_from_values(
    service: &mut MrtdService,
    k_seed: &[u8],
    rnd_icc: &[u8; 8],
    rnd_ifd: &[u8; 8],
    k_ifd: &[u8; 16],
) -> Result<(), Error> {
    // the key derivation functions are shared with PACE
    let k_enc = Cam3Des.derive_encryption_key(k_seed);
    let k_mac = Cam3Des.derive_mac_key(k_seed);

    // S = rnd_ifd || rnd_icc || k_ifd, encrypted with a zero IV
    let mut cryptogram = Zeroizing::new([0u8; 40]);
    cryptogram[0..8].copy_from_slice(rnd_ifd);
    cryptogram[8..16].copy_from_slice(rnd_icc);
    cryptogram[16..32].copy_from_slice(k_ifd.as_ref());
    let iv = [0u8; 8];
    Cam3Des.encrypt_padded_data(&mut cryptogram[0..32], &k_enc, &iv);

    let mut mac_input = Zeroizing::new(cryptogram[0..32].to_vec());
    pad(&mut mac_input, Cam3Des.mac_block_size());
    let mac = Cam3Des.mac_padded_data(&mac_input, &k_mac);
    cryptogram[32..40].copy_from_slice(&mac);

    let mut reply = Zeroizing::new(service.external_authenticate_mutual(&cryptogram)?);

    // check the chip's MAC before touching the ciphertext
    let mut reply_mac_input = Zeroizing::new(reply[0..32].to_vec());
    pad(&mut reply_mac_input, Cam3Des.mac_block_size());
    if !Cam3Des.verify_mac_padded_data(&reply_mac_input, &k_mac, &reply[32..40]) {
        return Err(Error::ResponseMac);
    }

    // R = rnd_icc || rnd_ifd || k_icc
    Cam3Des.decrypt_padded_data(&mut reply[0..32], &k_enc, &iv);
    if reply[0..8] != rnd_icc[..] {
        return Err(Error::Denied { value: MismatchedValue::RndIcc });
    }
    if reply[8..16] != rnd_ifd[..] {
        return Err(Error::Denied { value: MismatchedValue::RndIfd });
    }

    let mut session_seed = Zeroizing::new([0u8; 16]);
    for (seed_byte, (ifd_byte, icc_byte)) in session_seed.iter_mut().zip(k_ifd.iter().zip(&reply[16..32])) {
        *seed_byte = ifd_byte ^ icc_byte;
    }

    let k_session_enc = Cam3Des.derive_encryption_key(session_seed.as_ref());
    let k_session_mac = Cam3Des.derive_mac_key(session_seed.as_ref());

    let mut initial_counter = Zeroizing::new([0u8; 8]);
    initial_counter[0..4].copy_from_slice(&rnd_icc[4..8]);
    initial_counter[4..8].copy_from_slice(&rnd_ifd[4..8]);

    let channel = SecureChannel::with_send_sequence_counter(
        ChannelCipher::TripleDes,
        &k_session_enc,
        &k_session_mac,
        initial_counter.as_ref(),
    )?;
    service.set_channel(Some(channel));
    Ok(())
}

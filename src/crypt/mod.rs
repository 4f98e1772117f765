//! Cryptographic functionality.


pub mod cipher_mac;
pub mod dh;
pub mod elliptic;


use std::fmt;

use crypto_bigint::BoxedUint;
use digest::Digest;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::dh::DiffieHellmanParams;
use crate::crypt::elliptic::{AffinePoint, PrimeWeierstrassCurve};


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CryptoError {
    KeyLength { obtained: usize, expected: usize },
    PointEncoding,
    PointNotOnCurve,
    EvenPrime,
    GeneratorNotOnCurve,
    PointAtInfinity,
    PublicKeyRange,
    SigningFailed,
}
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyLength { obtained, expected }
                => write!(f, "key is {} bytes long, expected {}", obtained, expected),
            Self::PointEncoding
                => write!(f, "invalid encoding of an elliptic curve point"),
            Self::PointNotOnCurve
                => write!(f, "point does not lie on the curve"),
            Self::EvenPrime
                => write!(f, "curve prime is even"),
            Self::GeneratorNotOnCurve
                => write!(f, "generator does not lie on the curve"),
            Self::PointAtInfinity
                => write!(f, "operation produced the point at infinity"),
            Self::PublicKeyRange
                => write!(f, "public key is outside the valid range"),
            Self::SigningFailed
                => write!(f, "signing operation failed"),
        }
    }
}
impl std::error::Error for CryptoError {
}


/// A hash function referenced by a protocol object identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}
impl DigestAlgorithm {
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}


/// A key agreement method with concrete domain parameters.
///
/// Private keys are unsigned integers. Serialized public keys are unsigned
/// big-endian integers (classic Diffie-Hellman) or uncompressed points
/// (`0x04 || x || y`, elliptic curves); both are left-padded to the size of
/// the underlying prime field.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub enum KeyAgreement {
    DiffieHellman(DiffieHellmanParams),
    EllipticDiffieHellman(PrimeWeierstrassCurve),
}
impl KeyAgreement {
    /// The recommended length of a freshly generated private key in bytes.
    pub fn private_key_len_bytes(&self) -> usize {
        match self {
            Self::DiffieHellman(params) => params.subgroup_size_bytes(),
            Self::EllipticDiffieHellman(curve) => curve.field_len_bytes(),
        }
    }

    /// Generates a random private key from the operating system RNG.
    pub fn generate_private_key(&self) -> Zeroizing<BoxedUint> {
        let mut key_bytes = Zeroizing::new(vec![0u8; self.private_key_len_bytes()]);
        OsRng.fill_bytes(key_bytes.as_mut_slice());
        Zeroizing::new(boxed_uint_from_be_slice(&key_bytes))
    }

    /// Calculates the serialized public key for the given private key.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> Zeroizing<Vec<u8>> {
        match self {
            Self::DiffieHellman(params) => {
                let public_key = params.calculate_public_key(private_key);
                Zeroizing::new(left_pad(&public_key.to_be_bytes(), params.prime_len_bytes()))
            },
            Self::EllipticDiffieHellman(curve) => {
                let public_key = curve.calculate_public_key(private_key);
                public_key.to_sec1_bytes(curve.field_len_bytes())
            },
        }
    }

    /// Performs the key agreement against the other party's serialized public
    /// key.
    ///
    /// Returns the shared secret: the big-endian shared integer (classic
    /// Diffie-Hellman) or the x coordinate of the shared point (elliptic
    /// curves), left-padded to the field size.
    pub fn exchange_keys(&self, private_key: &BoxedUint, other_public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match self {
            Self::DiffieHellman(params) => {
                if other_public_key.len() > params.prime_len_bytes() {
                    return Err(CryptoError::PublicKeyRange);
                }
                let other = Zeroizing::new(boxed_uint_from_be_slice(other_public_key));
                let shared = params.diffie_hellman(private_key, &other)?;
                Ok(Zeroizing::new(left_pad(&shared.to_be_bytes(), params.prime_len_bytes())))
            },
            Self::EllipticDiffieHellman(curve) => {
                if other_public_key.len() != 1 + 2*curve.field_len_bytes() {
                    return Err(CryptoError::PointEncoding);
                }
                let other = AffinePoint::try_from_sec1_bytes(other_public_key)
                    .ok_or(CryptoError::PointEncoding)?;
                let shared = curve.diffie_hellman(private_key, &other)?;
                Ok(Zeroizing::new(left_pad(&shared.x().to_be_bytes(), curve.field_len_bytes())))
            },
        }
    }

    /// Derives the ephemeral domain parameters of PACE generic mapping.
    ///
    /// The key agreement with the chip's mapping public key is folded in
    /// because the elliptic variant needs both coordinates of the shared
    /// point, which [`Self::exchange_keys`] does not expose.
    pub fn derive_generic_mapping(&self, nonce: &BoxedUint, private_key: &BoxedUint, other_public_key: &[u8]) -> Result<Self, CryptoError> {
        match self {
            Self::DiffieHellman(params) => {
                if other_public_key.len() > params.prime_len_bytes() {
                    return Err(CryptoError::PublicKeyRange);
                }
                let other = Zeroizing::new(boxed_uint_from_be_slice(other_public_key));
                let shared = params.diffie_hellman(private_key, &other)?;
                Ok(Self::DiffieHellman(params.derive_generic_mapping(nonce, &shared)))
            },
            Self::EllipticDiffieHellman(curve) => {
                if other_public_key.len() != 1 + 2*curve.field_len_bytes() {
                    return Err(CryptoError::PointEncoding);
                }
                let other = AffinePoint::try_from_sec1_bytes(other_public_key)
                    .ok_or(CryptoError::PointEncoding)?;
                let shared = curve.diffie_hellman(private_key, &other)?;
                Ok(Self::EllipticDiffieHellman(curve.derive_generic_mapping_curve(nonce, &shared)?))
            },
        }
    }

    /// Derives the ephemeral domain parameters of PACE integrated mapping from
    /// the pseudorandom function output.
    pub fn derive_integrated_mapping(&self, pseudorandom: &BoxedUint) -> Result<Self, CryptoError> {
        match self {
            Self::DiffieHellman(params) => {
                Ok(Self::DiffieHellman(params.derive_integrated_mapping(pseudorandom)?))
            },
            Self::EllipticDiffieHellman(curve) => {
                Ok(Self::EllipticDiffieHellman(curve.derive_integrated_mapping_curve(pseudorandom)?))
            },
        }
    }

    /// The modulus the integrated-mapping pseudorandom function output is
    /// reduced by.
    pub fn prime(&self) -> &BoxedUint {
        match self {
            Self::DiffieHellman(params) => params.prime(),
            Self::EllipticDiffieHellman(curve) => curve.prime(),
        }
    }

    /// The context-specific tag carrying a public key of this kind in
    /// authentication data objects.
    pub fn public_key_do_tag(&self) -> u16 {
        match self {
            Self::DiffieHellman(_) => 0x84,
            Self::EllipticDiffieHellman(_) => 0x86,
        }
    }
}


pub fn boxed_uint_from_be_slice(slice: &[u8]) -> BoxedUint {
    let bits: u32 = (8 * slice.len().max(1)).try_into().unwrap();
    BoxedUint::from_be_slice(slice, bits).unwrap()
}

/// Brings a value to the given precision, widening or shortening as needed.
/// Shortening must not truncate significant bits; callers reduce the value
/// first.
pub(crate) fn resize_precision(value: &BoxedUint, bits_precision: u32) -> BoxedUint {
    if value.bits_precision() > bits_precision {
        value.shorten(bits_precision)
    } else {
        value.widen(bits_precision)
    }
}

/// Left-pads a big-endian integer encoding with zero bytes to the given
/// width. Values already at least that wide keep only their `width` least
/// significant bytes.
pub fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut ret = vec![0u8; width];
    let significant = &bytes[bytes.len().saturating_sub(width)..];
    ret[width - significant.len()..].copy_from_slice(significant);
    ret
}


#[cfg(test)]
mod tests {
    use super::left_pad;

    #[test]
    fn test_left_pad() {
        assert_eq!(left_pad(&[0x01, 0x02], 4), [0x00, 0x00, 0x01, 0x02]);
        assert_eq!(left_pad(&[0x01, 0x02], 2), [0x01, 0x02]);
        assert_eq!(left_pad(&[0x00, 0x01, 0x02], 2), [0x01, 0x02]);
        assert_eq!(left_pad(&[], 2), [0x00, 0x00]);
    }
}

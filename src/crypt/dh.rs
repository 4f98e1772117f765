//! Classic (finite-field) Diffie-Hellman.


use crypto_bigint::{BoxedUint, NonZero};
use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::CryptoError;


/// A prime-order-subgroup Diffie-Hellman group.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub struct DiffieHellmanParams {
    /// The prime modulus `p`.
    prime: BoxedUint,

    /// The generator `g` of the subgroup of order `q`.
    generator: BoxedUint,

    /// The prime order `q` of the subgroup generated by `g`.
    subgroup_order: BoxedUint,
}
impl DiffieHellmanParams {
    pub fn new(prime: BoxedUint, generator: BoxedUint, subgroup_order: BoxedUint) -> Self {
        Self {
            prime,
            generator,
            subgroup_order,
        }
    }

    pub fn prime(&self) -> &BoxedUint { &self.prime }
    pub fn generator(&self) -> &BoxedUint { &self.generator }
    pub fn subgroup_order(&self) -> &BoxedUint { &self.subgroup_order }

    /// The length of the prime modulus in bytes.
    pub fn prime_len_bytes(&self) -> usize {
        self.prime.bits().div_ceil(8).try_into().unwrap()
    }

    /// The recommended length of a private key in bytes, matching the
    /// subgroup order.
    pub fn subgroup_size_bytes(&self) -> usize {
        self.subgroup_order.bits().div_ceil(8).try_into().unwrap()
    }

    /// `base ** exponent mod p` through Montgomery arithmetic. The base must
    /// already be at the prime's precision.
    fn modpow(&self, base: &BoxedUint, exponent: &BoxedUint) -> BoxedUint {
        let params = BoxedMontyParams::new(self.prime.to_odd().unwrap());
        let reduced = base.rem(&NonZero::new(self.prime.clone()).unwrap());
        let base_monty = BoxedMontyForm::new(reduced, params);
        base_monty.pow(exponent).retrieve()
    }

    /// Calculates the public key `g ** private_key mod p`.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> BoxedUint {
        self.modpow(&self.generator, private_key)
    }

    /// Derives the shared secret `other_public_key ** private_key mod p`.
    ///
    /// Rejects public keys outside the range `2 ..= p - 2`.
    pub fn diffie_hellman(&self, private_key: &BoxedUint, other_public_key: &BoxedUint) -> Result<BoxedUint, CryptoError> {
        let one = BoxedUint::one();
        let wide_other = other_public_key.widen(self.prime.bits_precision());
        let prime_minus_one = self.prime.wrapping_sub(&one.widen(self.prime.bits_precision()));
        if wide_other <= one.widen(self.prime.bits_precision()) || wide_other >= prime_minus_one {
            return Err(CryptoError::PublicKeyRange);
        }
        Ok(self.modpow(&wide_other, private_key))
    }

    /// Derives the ephemeral group of PACE generic mapping: the same prime
    /// and order with the new generator `g ** nonce * h mod p`, where `h` is
    /// the shared secret of the mapping key agreement.
    pub fn derive_generic_mapping(&self, nonce: &BoxedUint, shared_secret: &BoxedUint) -> Self {
        let nonced_generator = self.modpow(&self.generator, nonce);
        let new_generator = nonced_generator.mul_mod(
            &shared_secret.widen(self.prime.bits_precision()),
            &self.prime,
        );
        Self {
            prime: self.prime.clone(),
            generator: new_generator,
            subgroup_order: self.subgroup_order.clone(),
        }
    }

    /// Derives the ephemeral group of PACE integrated mapping: the new
    /// generator is `f_g(x) = x ** ((p - 1) / q) mod p` applied to the
    /// pseudorandom function output.
    pub fn derive_integrated_mapping(&self, pseudorandom: &BoxedUint) -> Result<Self, CryptoError> {
        let one = BoxedUint::one().widen(self.prime.bits_precision());
        let prime_minus_one = self.prime.wrapping_sub(&one);
        let cofactor_exponent = prime_minus_one
            .checked_div(&crate::crypt::resize_precision(&self.subgroup_order, self.prime.bits_precision()))
            .expect("subgroup order is zero");

        let base = crate::crypt::resize_precision(pseudorandom, self.prime.bits_precision());
        let new_generator = self.modpow(&base, &cofactor_exponent);
        if new_generator == one || bool::from(new_generator.is_zero()) {
            // x generated a trivial subgroup; the mapping is undefined
            return Err(CryptoError::PublicKeyRange);
        }
        Ok(Self {
            prime: self.prime.clone(),
            generator: new_generator,
            subgroup_order: self.subgroup_order.clone(),
        })
    }
}


/// Standardized groups referenced by Doc 9303 Part 11 §9.5.1.
pub mod groups {
    use hex_literal::hex;

    use crate::crypt::boxed_uint_from_be_slice;
    use super::DiffieHellmanParams;

    /// The 1024-bit MODP group with a 160-bit prime order subgroup
    /// (RFC 5114 §2.1), standardized domain parameter id 0.
    pub fn get_modp_1024_160() -> DiffieHellmanParams {
        DiffieHellmanParams::new(
            boxed_uint_from_be_slice(&hex!("
                B10B8F96 A080E01D DE92DE5E AE5D54EC
                52C99FBC FB06A3C6 9A6A9DCA 52D23B61
                6073E286 75A23D18 9838EF1E 2EE652C0
                13ECB4AE A9061123 24975C3C D49B83BF
                ACCBDD7D 90C4BD70 98488E9C 219A7372
                4EFFD6FA E5644738 FAA31A4F F55BCCC0
                A151AF5F 0DC8B4BD 45BF37DF 365C1A65
                E68CFDA7 6D4DA708 DF1FB2BC 2E4A4371
            ")),
            boxed_uint_from_be_slice(&hex!("
                A4D1CBD5 C3FD3412 6765A442 EFB99905
                F8104DD2 58AC507F D6406CFF 14266D31
                266FEA1E 5C41564B 777E690F 5504F213
                160217B4 B01B886A 5E91547F 9E2749F4
                D7FBD7D3 B9A92EE1 909D0D22 63F80A76
                A6A24C08 7A091F53 1DBF0A01 69B6A28A
                D662A4D1 8E73AFA3 2D779D59 18D08BC8
                858F4DCE F97C2A24 855E6EEB 22B3B2E5
            ")),
            boxed_uint_from_be_slice(&hex!("
                F518AA87 81A8DF27 8ABA4E7D 64B7CB9D
                49462353
            ")),
        )
    }
}

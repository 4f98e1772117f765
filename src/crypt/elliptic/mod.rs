//! Elliptic-curve arithmetic over short Weierstrass curves.
//!
//! The curves used by travel documents are the named NIST and Brainpool
//! curves (see [`curves`]); all of them have the form `y² ≡ x³ + ax + b` over
//! a prime field. Point addition and doubling use the complete projective
//! formulas of Renes, Costello and Batina (<https://eprint.iacr.org/2015/1060>,
//! Algorithms 1 and 3), which are exception-free for these curves.


pub mod curves;


use std::ops::{Add, Mul};

use crypto_bigint::{BoxedUint, Integer, NonZero};
use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use subtle::{Choice, ConstantTimeEq, CtOption};
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{boxed_uint_from_be_slice, CryptoError};


/// A curve point in affine coordinates.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub struct AffinePoint {
    x: BoxedUint,
    y: BoxedUint,
}
impl AffinePoint {
    pub const fn new(x: BoxedUint, y: BoxedUint) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> &BoxedUint { &self.x }
    pub fn y(&self) -> &BoxedUint { &self.y }

    /// Serializes the point as an uncompressed SEC1 point:
    /// `0x04 || x || y` with both coordinates left-padded to the field size.
    pub fn to_sec1_bytes(&self, bytes_per_coordinate: usize) -> Zeroizing<Vec<u8>> {
        let mut ret = Zeroizing::new(Vec::with_capacity(1 + 2*bytes_per_coordinate));
        ret.push(0x04);
        for coordinate in [&self.x, &self.y] {
            let coordinate_bytes = Zeroizing::new(coordinate.to_be_bytes());
            let significant = &coordinate_bytes[coordinate_bytes.len().saturating_sub(bytes_per_coordinate)..];
            let new_len = ret.len() + bytes_per_coordinate - significant.len();
            ret.resize(new_len, 0x00);
            ret.extend(significant);
        }
        ret
    }

    /// Parses an uncompressed SEC1 point. The two coordinates must be of
    /// equal width; compressed encodings are not accepted.
    pub fn try_from_sec1_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 || bytes[0] != 0x04 || (bytes.len() - 1) % 2 != 0 {
            return None;
        }
        let coordinate_length = (bytes.len() - 1) / 2;
        let x = boxed_uint_from_be_slice(&bytes[1..1+coordinate_length]);
        let y = boxed_uint_from_be_slice(&bytes[1+coordinate_length..]);
        Some(Self { x, y })
    }
}


/// A projective point with coordinates in Montgomery form.
#[derive(Clone, Debug)]
struct ProjectivePoint {
    x: BoxedMontyForm,
    y: BoxedMontyForm,
    z: BoxedMontyForm,
}

/// Precomputed per-curve constants for Montgomery-form arithmetic.
#[derive(Clone, Debug)]
struct FieldContext {
    params: BoxedMontyParams,
    a: BoxedMontyForm,
    b: BoxedMontyForm,
    b3: BoxedMontyForm,
}
impl FieldContext {
    fn affine_to_projective(&self, point: &AffinePoint) -> ProjectivePoint {
        ProjectivePoint {
            x: BoxedMontyForm::new(point.x.widen(self.params.bits_precision()), self.params.clone()),
            y: BoxedMontyForm::new(point.y.widen(self.params.bits_precision()), self.params.clone()),
            z: BoxedMontyForm::one(self.params.clone()),
        }
    }

    fn infinity(&self) -> ProjectivePoint {
        ProjectivePoint {
            x: BoxedMontyForm::zero(self.params.clone()),
            y: BoxedMontyForm::one(self.params.clone()),
            z: BoxedMontyForm::zero(self.params.clone()),
        }
    }

    /// Recovers affine Montgomery-form coordinates; the `CtOption` is empty
    /// for the point at infinity.
    fn projective_to_affine(&self, point: &ProjectivePoint) -> CtOption<(BoxedMontyForm, BoxedMontyForm)> {
        let z_inverse = point.z.invert();
        let fallback = point.z.clone();
        let inverse = z_inverse.clone().into_option().unwrap_or(fallback);

        let x = (&point.x).mul(&inverse);
        let y = (&point.y).mul(&inverse);
        CtOption::new((x, y), z_inverse.is_some())
    }

    fn is_on_curve(&self, point: &ProjectivePoint) -> Choice {
        let affine = self.projective_to_affine(point);
        let affine_present = affine.is_some();
        let (x, y) = affine.into_option().unwrap_or_else(|| {
            (BoxedMontyForm::zero(self.params.clone()), BoxedMontyForm::zero(self.params.clone()))
        });

        let lhs = (&y).mul(&y);
        let x_cubed = (&x).mul(&x).mul(&x);
        let rhs = (&x_cubed).add(&(&x).mul(&self.a)).add(&self.b);
        lhs.retrieve().ct_eq(&rhs.retrieve()) & affine_present
    }

    /// Complete point addition (Renes/Costello/Batina Algorithm 1).
    fn add_points(&self, lhs: &ProjectivePoint, rhs: &ProjectivePoint) -> ProjectivePoint {
        let mut t0 = (&lhs.x).mul(&rhs.x);
        let mut t1 = (&lhs.y).mul(&rhs.y);
        let mut t2 = (&lhs.z).mul(&rhs.z);
        let mut t3 = (&lhs.x).add(&lhs.y);
        let mut t4 = (&rhs.x).add(&rhs.y);
        t3 = (&t3).mul(&t4);
        t4 = (&t0).add(&t1);
        t3 = (&t3).sub(&t4);
        t4 = (&lhs.x).add(&lhs.z);
        let mut t5 = (&rhs.x).add(&rhs.z);
        t4 = (&t4).mul(&t5);
        t5 = (&t0).add(&t2);
        t4 = (&t4).sub(&t5);
        t5 = (&lhs.y).add(&lhs.z);
        let mut x3 = (&rhs.y).add(&rhs.z);
        t5 = (&t5).mul(&x3);
        x3 = (&t1).add(&t2);
        t5 = (&t5).sub(&x3);
        let mut z3 = (&self.a).mul(&t4);
        x3 = (&self.b3).mul(&t2);
        z3 = (&x3).add(&z3);
        x3 = (&t1).sub(&z3);
        z3 = (&t1).add(&z3);
        let mut y3 = (&x3).mul(&z3);
        t1 = (&t0).add(&t0);
        t1 = (&t1).add(&t0);
        t2 = (&self.a).mul(&t2);
        t4 = (&self.b3).mul(&t4);
        t1 = (&t1).add(&t2);
        t2 = (&t0).sub(&t2);
        t2 = (&self.a).mul(&t2);
        t4 = (&t4).add(&t2);
        t0 = (&t1).mul(&t4);
        y3 = (&y3).add(&t0);
        t0 = (&t5).mul(&t4);
        x3 = (&t3).mul(&x3);
        x3 = (&x3).sub(&t0);
        t0 = (&t3).mul(&t1);
        z3 = (&t5).mul(&z3);
        z3 = (&z3).add(&t0);
        ProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Complete point doubling (Renes/Costello/Batina Algorithm 3).
    fn double_point(&self, point: &ProjectivePoint) -> ProjectivePoint {
        let mut t0 = (&point.x).mul(&point.x);
        let t1 = (&point.y).mul(&point.y);
        let mut t2 = (&point.z).mul(&point.z);
        let mut t3 = (&point.x).mul(&point.y);
        t3 = (&t3).add(&t3);
        let mut z3 = (&point.x).mul(&point.z);
        z3 = (&z3).add(&z3);
        let mut x3 = (&self.a).mul(&z3);
        let mut y3 = (&self.b3).mul(&t2);
        y3 = (&x3).add(&y3);
        x3 = (&t1).sub(&y3);
        y3 = (&t1).add(&y3);
        y3 = (&x3).mul(&y3);
        x3 = (&t3).mul(&x3);
        z3 = (&self.b3).mul(&z3);
        t2 = (&self.a).mul(&t2);
        t3 = (&t0).sub(&t2);
        t3 = (&self.a).mul(&t3);
        t3 = (&t3).add(&z3);
        z3 = (&t0).add(&t0);
        t0 = (&z3).add(&t0);
        t0 = (&t0).add(&t2);
        t0 = (&t0).mul(&t3);
        y3 = (&y3).add(&t0);
        t2 = (&point.y).mul(&point.z);
        t2 = (&t2).add(&t2);
        t0 = (&t2).mul(&t3);
        x3 = (&x3).sub(&t0);
        z3 = (&t2).mul(&t1);
        z3 = (&z3).add(&z3);
        z3 = (&z3).add(&z3);
        ProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Double-and-add scalar multiplication, least significant bit first.
    fn multiply(&self, scalar: &BoxedUint, point: &ProjectivePoint) -> ProjectivePoint {
        let mut result = self.infinity();
        if bool::from(scalar.is_zero()) {
            return result;
        }

        let mut doubled = point.clone();
        for i in 0..scalar.bits() {
            let sum = self.add_points(&result, &doubled);
            result = if bool::from(scalar.bit(i)) { sum } else { result };
            doubled = self.double_point(&doubled);
        }
        result
    }
}


/// An elliptic curve of the form `y² ≡ x³ + ax + b` modulo a prime number.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub struct PrimeWeierstrassCurve {
    /// The prime (modulus) of the curve.
    prime: BoxedUint,

    /// Coefficient `a` in the curve's formula.
    coefficient_a: BoxedUint,

    /// Coefficient `b` in the curve's formula.
    coefficient_b: BoxedUint,

    /// The coordinates of the generator point of the curve.
    generator: AffinePoint,

    /// The cofactor of the curve's group.
    cofactor: u8,
}
impl PrimeWeierstrassCurve {
    pub fn new(
        prime: BoxedUint,
        coefficient_a: BoxedUint,
        coefficient_b: BoxedUint,
        generator: AffinePoint,
        cofactor: u8,
    ) -> Result<Self, CryptoError> {
        if !bool::from(prime.is_odd()) {
            return Err(CryptoError::EvenPrime);
        }

        let curve = Self {
            prime,
            coefficient_a,
            coefficient_b,
            generator,
            cofactor,
        };
        if !bool::from(curve.is_on_curve(&curve.generator)) {
            return Err(CryptoError::GeneratorNotOnCurve);
        }
        Ok(curve)
    }

    pub fn prime(&self) -> &BoxedUint { &self.prime }
    pub fn coefficient_a(&self) -> &BoxedUint { &self.coefficient_a }
    pub fn coefficient_b(&self) -> &BoxedUint { &self.coefficient_b }
    pub fn generator(&self) -> &AffinePoint { &self.generator }
    pub fn cofactor(&self) -> u8 { self.cofactor }

    /// The width of a field element (and thus of a serialized coordinate or
    /// private key) in bytes.
    pub fn field_len_bytes(&self) -> usize {
        usize::try_from(self.prime.bits().div_ceil(8)).unwrap()
    }

    fn field(&self) -> FieldContext {
        let params = BoxedMontyParams::new(self.prime.to_odd().unwrap());
        let a = BoxedMontyForm::new(self.coefficient_a.clone(), params.clone());
        let b = BoxedMontyForm::new(self.coefficient_b.clone(), params.clone());
        let b3 = (&b).add(&b).add(&b);
        FieldContext { params, a, b, b3 }
    }

    pub fn is_on_curve(&self, point: &AffinePoint) -> Choice {
        let field = self.field();
        let projective = field.affine_to_projective(point);
        field.is_on_curve(&projective)
    }

    /// Calculates the public key `private_key * generator`.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> AffinePoint {
        let field = self.field();
        let generator = field.affine_to_projective(&self.generator);
        let product = field.multiply(private_key, &generator);
        let (x, y) = field.projective_to_affine(&product)
            .expect("multiple of the generator is the point at infinity");
        AffinePoint::new(x.retrieve(), y.retrieve())
    }

    /// Derives the shared point `private_key * other_public_key`.
    ///
    /// The other party's public key is verified to lie on the curve first.
    pub fn diffie_hellman(&self, private_key: &BoxedUint, other_public_key: &AffinePoint) -> Result<AffinePoint, CryptoError> {
        let field = self.field();
        let other = field.affine_to_projective(other_public_key);
        if !bool::from(field.is_on_curve(&other)) {
            return Err(CryptoError::PointNotOnCurve);
        }

        let product = field.multiply(private_key, &other);
        let (x, y) = field.projective_to_affine(&product)
            .into_option().ok_or(CryptoError::PointAtInfinity)?;
        Ok(AffinePoint::new(x.retrieve(), y.retrieve()))
    }

    /// Derives the ephemeral curve of PACE generic mapping: the same curve
    /// with the new generator `nonce * generator + shared_secret`.
    pub fn derive_generic_mapping_curve(&self, nonce: &BoxedUint, shared_secret: &AffinePoint) -> Result<Self, CryptoError> {
        let field = self.field();
        let generator = field.affine_to_projective(&self.generator);
        let shared = field.affine_to_projective(shared_secret);

        let nonced = field.multiply(nonce, &generator);
        let sum = field.add_points(&nonced, &shared);
        let (x, y) = field.projective_to_affine(&sum)
            .into_option().ok_or(CryptoError::PointAtInfinity)?;

        Ok(Self {
            prime: self.prime.clone(),
            coefficient_a: self.coefficient_a.clone(),
            coefficient_b: self.coefficient_b.clone(),
            generator: AffinePoint::new(x.retrieve(), y.retrieve()),
            cofactor: self.cofactor,
        })
    }

    /// Derives the ephemeral curve of PACE integrated mapping: the new
    /// generator is obtained from the pseudorandom function output through
    /// the point encoding of BSI TR-03111 for `p ≡ 3 (mod 4)`.
    pub fn derive_integrated_mapping_curve(&self, pseudorandom: &BoxedUint) -> Result<Self, CryptoError> {
        let two = BoxedUint::from_be_slice(&[0x02], self.prime.bits_precision()).unwrap();
        let three = BoxedUint::from_be_slice(&[0x03], self.prime.bits_precision()).unwrap();
        let four = NonZero::new(BoxedUint::from_be_slice(&[0x04], self.prime.bits_precision()).unwrap()).unwrap();
        if !bool::from(self.prime.rem(&four).ct_eq(&three)) {
            // the point encoding is only defined for p == 3 (mod 4)
            return Err(CryptoError::PointEncoding);
        }

        let field = self.field();
        let r_value = crate::crypt::resize_precision(pseudorandom, field.params.bits_precision());
        let r = BoxedMontyForm::new(r_value, field.params.clone());
        let one = BoxedMontyForm::one(field.params.clone());
        let prime_minus_two = self.prime() - &two;

        let alpha = r.square().neg();

        // x2 = -b (1 + alpha + alpha²) / (a (alpha + alpha²)), the inversion
        // expressed as a power of p - 2
        let alpha_plus_alpha_squared = (&alpha).add(&alpha.square());
        let numerator = (&field.b).neg().mul(&(&one).add(&alpha_plus_alpha_squared));
        let denominator_inverted = (&field.a).mul(&alpha_plus_alpha_squared).pow(&prime_minus_two);
        let x2 = (&numerator).mul(&denominator_inverted);

        let x3 = (&alpha).mul(&x2);

        // h2 = x2³ + a x2 + b
        let h2 = (&x2).pow(&three).add(&(&field.a).mul(&x2)).add(&field.b);
        let u = (&r).pow(&three).mul(&h2);

        // A = h2^(p - 1 - (p+1)/4)
        let prime_plus_one_by_four = (self.prime() + &BoxedUint::one()) / (&four);
        let exponent = self.prime() - &BoxedUint::one().widen(self.prime.bits_precision()) - &prime_plus_one_by_four;
        let a = h2.pow(&exponent);

        // pick x2 if h2 is a square, x3 otherwise
        let mut point = if (&a).square().mul(&h2) == one {
            ProjectivePoint {
                x: x2,
                y: (&a).mul(&h2),
                z: one.clone(),
            }
        } else {
            ProjectivePoint {
                x: x3,
                y: (&a).mul(&u),
                z: one.clone(),
            }
        };

        if self.cofactor != 1 {
            let cofactor = BoxedUint::from_be_slice(&[self.cofactor], self.prime.bits_precision()).unwrap();
            point = field.multiply(&cofactor, &point);
        }
        let (x, y) = field.projective_to_affine(&point)
            .into_option().ok_or(CryptoError::PointAtInfinity)?;

        Ok(Self {
            prime: self.prime.clone(),
            coefficient_a: self.coefficient_a.clone(),
            coefficient_b: self.coefficient_b.clone(),
            generator: AffinePoint::new(x.retrieve(), y.retrieve()),
            cofactor: self.cofactor,
        })
    }
}

//! Access keys derived from the machine-readable zone.
//!
//! BAC and PACE derive their static keys from three MRZ fields: the document
//! number, the date of birth, and the date of expiry, each followed by its
//! ICAO check digit. The concatenation of these nine-plus-fillers/seven/seven
//! characters is hashed with SHA-1; BAC uses the first 16 bytes of the hash as
//! its key seed while PACE feeds the full 20 bytes into the password KDF.


use std::fmt;

use digest::Digest;
use sha1::Sha1;
use smallstr::SmallString;
use zeroize::Zeroizing;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    EmptyDocumentNumber,
    DocumentNumberCharacter { character: char },
    DateLength { obtained: usize },
    DateCharacter { character: char },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDocumentNumber
                => write!(f, "document number is empty"),
            Self::DocumentNumberCharacter { character }
                => write!(f, "document number contains invalid character {:?}", character),
            Self::DateLength { obtained }
                => write!(f, "date has {} characters, expected 6 (YYMMDD)", obtained),
            Self::DateCharacter { character }
                => write!(f, "date contains non-digit character {:?}", character),
        }
    }
}
impl std::error::Error for Error {
}


/// Computes the ICAO 7-3-1 check digit over MRZ characters.
///
/// Digits carry their value, letters carry 10 through 35, and `<` carries
/// zero.
pub fn check_digit(data: &[u8]) -> u8 {
    const WEIGHTS: [u8; 3] = [7, 3, 1];

    let mut check: u8 = 0;
    for (b, weight) in data.iter().copied().zip(WEIGHTS.iter().copied().cycle()) {
        let value = if b.is_ascii_digit() {
            b - b'0'
        } else if b.is_ascii_uppercase() {
            b + 10 - b'A'
        } else {
            // '<' and anything unexpected count as zero
            0
        };
        // worst case: 'Z' at weight 7 (245) plus check digit 9 still fits u8
        check = (check + value * weight) % 10;
    }
    check
}


/// The key-relevant fields of the machine-readable zone.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MrzKey {
    document_number: SmallString<[u8; 22]>,
    date_of_birth: SmallString<[u8; 6]>,
    date_of_expiry: SmallString<[u8; 6]>,
}
impl MrzKey {
    /// Builds an access key from the raw field values.
    ///
    /// The document number may be given with or without trailing fillers;
    /// dates must be six digits in YYMMDD order.
    pub fn new(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self, Error> {
        let trimmed = document_number.trim_end_matches('<');
        if trimmed.is_empty() {
            return Err(Error::EmptyDocumentNumber);
        }
        for c in trimmed.chars() {
            if !(c.is_ascii_digit() || c.is_ascii_uppercase() || c == '<') {
                return Err(Error::DocumentNumberCharacter { character: c });
            }
        }
        for date in [date_of_birth, date_of_expiry] {
            if date.len() != 6 {
                return Err(Error::DateLength { obtained: date.len() });
            }
            if let Some(c) = date.chars().find(|c| !c.is_ascii_digit()) {
                return Err(Error::DateCharacter { character: c });
            }
        }

        Ok(Self {
            document_number: SmallString::from_str(trimmed),
            date_of_birth: SmallString::from_str(date_of_birth),
            date_of_expiry: SmallString::from_str(date_of_expiry),
        })
    }

    pub fn document_number(&self) -> &str { &self.document_number }
    pub fn date_of_birth(&self) -> &str { &self.date_of_birth }
    pub fn date_of_expiry(&self) -> &str { &self.date_of_expiry }

    /// The document number padded with `<` to at least nine characters, as it
    /// enters the key derivation.
    pub fn padded_document_number(&self) -> SmallString<[u8; 22]> {
        let mut padded = self.document_number.clone();
        while padded.len() < 9 {
            padded.push('<');
        }
        padded
    }

    /// The MRZ information string: each field followed by its check digit.
    pub fn mrz_information(&self) -> Zeroizing<String> {
        let padded_number = self.padded_document_number();

        let mut info = Zeroizing::new(String::with_capacity(padded_number.len() + 1 + 7 + 7));
        for field in [padded_number.as_str(), &self.date_of_birth, &self.date_of_expiry] {
            info.push_str(field);
            info.push(char::from(b'0' + check_digit(field.as_bytes())));
        }
        info
    }

    /// The 16-byte BAC key seed.
    pub fn bac_key_seed(&self) -> Zeroizing<[u8; 16]> {
        let hash = self.full_hash();
        let mut seed = Zeroizing::new([0u8; 16]);
        seed.copy_from_slice(&hash[0..16]);
        seed
    }

    /// The untruncated 20-byte seed used for the PACE password derivation.
    pub fn pace_key_seed(&self) -> Zeroizing<[u8; 20]> {
        self.full_hash()
    }

    fn full_hash(&self) -> Zeroizing<[u8; 20]> {
        let info = self.mrz_information();
        let mut hasher = Sha1::new();
        hasher.update(info.as_bytes());
        Zeroizing::new(hasher.finalize().into())
    }
}

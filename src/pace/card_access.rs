//! Decoding of the PACE entries in `EF.CardAccess`.


use std::fmt;

use rasn::{AsnType, Decode, Encode};
use rasn::types::{Any, Integer, ObjectIdentifier, SetOf};

use crate::pace::ProtocolParameters;


/// A `PACEInfo` security information item.
///
/// `EF.CardAccess` is a SET OF `SecurityInfo` structures, each a SEQUENCE
/// whose first member is the protocol object identifier. Non-PACE entries
/// need not share the rest of the layout, so decoding goes through [`Any`]
/// first and only commits to this structure for entries whose identifier is
/// a PACE protocol. Specified in Doc 9303 Part 11 §9.2.1.
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PaceInfo {
    pub protocol: ObjectIdentifier,
    pub version: Integer,
    pub parameter_id: Option<Integer>,
}
impl PaceInfo {
    /// The standardized domain parameter id as a single byte, the form it
    /// takes in the MSE:Set AT data object. Standardized ids are all below
    /// 32 (Doc 9303 Part 11 §9.5.1).
    pub fn parameter_id_byte(&self) -> Option<u8> {
        let id = self.parameter_id.as_ref()?;
        (0u8..32).find(|&candidate| &Integer::from(candidate) == id)
    }
}


#[derive(Debug)]
pub enum Error {
    CardAccess(rasn::error::DecodeError),
    Entry {
        entry_index: usize,
        error: rasn::error::DecodeError,
    },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::CardAccess(e)
                => write!(f, "failed to decode EF.CardAccess: {}", e),
            Self::Entry { entry_index, error }
                => write!(f, "failed to decode EF.CardAccess entry {}: {}", entry_index, error),
        }
    }
}
impl std::error::Error for Error {
}


/// Extracts the PACE entries from the DER content of `EF.CardAccess`.
///
/// Entries whose identifier is not a known PACE protocol are skipped, as are
/// structurally foreign entries (other `SecurityInfo` kinds share the file).
pub fn decode_pace_info(card_access: &[u8]) -> Result<Vec<PaceInfo>, Error> {
    let security_infos: SetOf<Any> = rasn::der::decode(card_access)
        .map_err(Error::CardAccess)?;

    let mut entries = Vec::new();
    for (entry_index, security_info) in security_infos.to_vec().into_iter().enumerate() {
        let Ok(members): Result<Vec<Any>, _> = rasn::der::decode(security_info.as_bytes()) else {
            continue;
        };
        let Some(first_member) = members.first() else {
            continue;
        };
        let Ok(protocol): Result<ObjectIdentifier, _> = rasn::der::decode(first_member.as_bytes()) else {
            continue;
        };
        if ProtocolParameters::from_oid(&protocol).is_none() {
            continue;
        }

        let pace_info: PaceInfo = rasn::der::decode(security_info.as_bytes())
            .map_err(|error| Error::Entry { entry_index, error })?;
        entries.push(pace_info);
    }
    Ok(entries)
}

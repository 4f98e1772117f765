//! ISO/IEC 7816 building blocks: APDU framing, the card transport interface,
//! and the MRTD file identifiers.

pub mod apdu;
pub mod files;
pub mod transport;

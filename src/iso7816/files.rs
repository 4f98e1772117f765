//! Identifiers of the files and applications on an eMRTD chip.


use hex_literal::hex;


/// Application identifier of the ICAO eMRTD applet.
pub const ICAO_MRTD_AID: [u8; 7] = hex!("A0 00 00 02 47 10 01");

/// Status words with protocol-level meaning.
pub mod sw {
    pub const NO_ERROR: u16 = 0x9000;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const COMMAND_NOT_ALLOWED: u16 = 0x6986;
}

/// File identifiers addressable with SELECT by FID.
pub mod fid {
    /// Common data (list of present data groups); below the applet DF.
    pub const EF_COM: u16 = 0x011E;

    /// Document Security Object; below the applet DF.
    pub const EF_SOD: u16 = 0x011D;

    /// PACE parameters; below the master file.
    pub const EF_CARD_ACCESS: u16 = 0x011C;

    /// Chip Authentication data for PACE-CAM; below the master file, where it
    /// shares the identifier of EF.SOD under the applet DF.
    pub const EF_CARD_SECURITY: u16 = 0x011D;

    /// File identifier of a data group (`DG1` through `DG16`).
    ///
    /// Returns `None` for data group numbers outside that range.
    pub const fn data_group(number: u8) -> Option<u16> {
        if number >= 1 && number <= 16 {
            Some(0x0100 | number as u16)
        } else {
            None
        }
    }
}

/// Short file identifiers (READ BINARY with SFI addressing).
pub mod sfi {
    pub const EF_COM: u8 = 0x1E;
    pub const EF_SOD: u8 = 0x1D;
    pub const EF_CARD_ACCESS: u8 = 0x1C;

    /// Short file identifier of a data group (`DG1` through `DG16`).
    pub const fn data_group(number: u8) -> Option<u8> {
        if number >= 1 && number <= 16 {
            Some(number)
        } else {
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_group_identifiers() {
        assert_eq!(fid::data_group(1), Some(0x0101));
        assert_eq!(fid::data_group(14), Some(0x010E));
        assert_eq!(fid::data_group(16), Some(0x0110));
        assert_eq!(fid::data_group(0), None);
        assert_eq!(fid::data_group(17), None);

        assert_eq!(sfi::data_group(1), Some(0x01));
        assert_eq!(sfi::data_group(16), Some(0x10));
        assert_eq!(sfi::data_group(17), None);
    }
}

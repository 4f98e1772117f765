//! Replays the PACE worked example of ICAO Doc 9303 Part 11 Appendix G.1
//! (ECDH, generic mapping, AES-128) against a scripted card.

mod common;

use hex_literal::hex;
use mrtd_terminal::crypt::elliptic::curves::get_brainpool_p256r1;
use mrtd_terminal::crypt::{boxed_uint_from_be_slice, KeyAgreement};
use mrtd_terminal::mrz::MrzKey;
use mrtd_terminal::pace::{self, oids, Password};
use mrtd_terminal::secure_messaging::ChannelCipher;
use mrtd_terminal::service::MrtdService;

use crate::common::ScriptedTransport;


fn appendix_g1_exchanges() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        // MSE:Set AT selecting PACE-ECDH-GM-AES-CBC-CMAC-128 with the MRZ
        (
            hex!("00 22 C1 A4 0F 80 0A 04007F00070202040202 83 01 01").to_vec(),
            hex!("9000").to_vec(),
        ),
        // step 1: empty dynamic authentication data, encrypted nonce back
        (
            hex!("10 86 00 00 02 7C00 00").to_vec(),
            hex!("7C 12 80 10 95A3A016522EE98D01E76CB6B98B42C3 9000").to_vec(),
        ),
        // step 2: mapping public keys
        (
            hex!("
                10 86 00 00 45
                7C 43 81 41 04
                7ACF3EFC982EC45565A4B155129EFBC74650DCBFA6362D896FC70262E0C2CC5E
                544552DCB6725218799115B55C9BAA6D9F6BC3A9618E70C25AF71777A9C4922D
                00
            ").to_vec(),
            hex!("
                7C 43 82 41 04
                824FBA91C9CBE26BEF53A0EBE7342A3BF178CEA9F45DE0B70AA601651FBA3F57
                30D8C879AAA9C9F73991E61B58F4D52EB87A0A0C709A49DC63719363CCD13C54
                9000
            ").to_vec(),
        ),
        // step 3: ephemeral public keys on the mapped curve
        (
            hex!("
                10 86 00 00 45
                7C 43 83 41 04
                2DB7A64C0355044EC9DF190514C625CBA2CEA48754887122F3A5EF0D5EDD301C
                3556F3B3B186DF10B857B58F6A7EB80F20BA5DC7BE1D43D9BF850149FBB36462
                00
            ").to_vec(),
            hex!("
                7C 43 84 41 04
                9E880F842905B8B3181F7AF7CAA9F0EFB743847F44A306D2D28C1D9EC65DF6DB
                7764B22277A2EDDC3C265A9F018F9CB852E111B768B326904B59A0193776F094
                9000
            ").to_vec(),
        ),
        // step 4: authentication tokens, end of chain
        (
            hex!("00 86 00 00 0C 7C 0A 85 08 C2B0BD78D94BA866 00").to_vec(),
            hex!("7C 0A 86 08 3ABB9674BCE93C08 9000").to_vec(),
        ),
    ]
}

#[test]
fn test_pace_ecdh_gm_appendix_g1() {
    let (transport, position) = ScriptedTransport::new(appendix_g1_exchanges());
    let mut service = MrtdService::new(Box::new(transport));

    let mrz_key = MrzKey::new("T22000129", "640812", "101031").unwrap();
    let mapping_secret = boxed_uint_from_be_slice(&hex!("
        7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C
        F21F249D 953BC46F 4C6E1925 9C010F99
    "));
    let agreement_secret = boxed_uint_from_be_slice(&hex!("
        A73FB703 AC1436A1 8E0CFA5A BB3F7BEC
        7A070E7A 6788486B EE230C4A 22762595
    "));

    let result = pace::establish_from_values(
        &mut service,
        oids::PACE_ECDH_GM_AES_CBC_CMAC_128,
        KeyAgreement::EllipticDiffieHellman(get_brainpool_p256r1()),
        &Password::Mrz(mrz_key),
        None,
        &mapping_secret,
        None,
        &agreement_secret,
    ).expect("failed to establish PACE");

    assert_eq!(position.get(), 5, "not every scripted exchange was used");

    assert_eq!(
        result.picc_nonce.as_slice(),
        hex!("3F00C4D39D153F2B2A214A078D899B22"),
    );
    assert_eq!(
        result.shared_secret.as_slice(),
        hex!("
            28768D20 701247DA E81804C9 E780EDE5
            82A9996D B4A31502 0B273319 7DB84925
        "),
    );
    assert!(result.chip_authentication_data.is_none());

    // the mapped curve carries the session generator of the worked example
    let KeyAgreement::EllipticDiffieHellman(mapped_curve) = &result.ephemeral_agreement else {
        panic!("expected an elliptic ephemeral agreement");
    };
    assert_eq!(
        mapped_curve.generator().x(),
        &boxed_uint_from_be_slice(&hex!("
            8CED63C9 1426D4F0 EB1435E7 CB1D74A4
            6723A0AF 21C89634 F65A9AE8 7A9265E2
        ")),
    );
    assert_eq!(
        mapped_curve.generator().y(),
        &boxed_uint_from_be_slice(&hex!("
            8C879506 743F8611 AC33645C 5B985C80
            B5F09A0B 83407C1B 6A4D857A E76FE522
        ")),
    );

    // a fresh AES-128 channel with a zeroed counter is installed
    let channel = service.channel().expect("no secure channel installed");
    assert_eq!(channel.cipher(), ChannelCipher::Aes128);
    assert_eq!(channel.send_sequence_counter(), [0u8; 16]);
}

#[test]
fn test_pace_rejects_echoed_ephemeral_key() {
    // the chip echoes the terminal's own ephemeral public key in step 3
    let mut exchanges = appendix_g1_exchanges();
    exchanges.truncate(4);
    exchanges[3].1 = hex!("
        7C 43 84 41 04
        2DB7A64C0355044EC9DF190514C625CBA2CEA48754887122F3A5EF0D5EDD301C
        3556F3B3B186DF10B857B58F6A7EB80F20BA5DC7BE1D43D9BF850149FBB36462
        9000
    ").to_vec();

    let (transport, _) = ScriptedTransport::new(exchanges);
    let mut service = MrtdService::new(Box::new(transport));

    let mrz_key = MrzKey::new("T22000129", "640812", "101031").unwrap();
    let result = pace::establish_from_values(
        &mut service,
        oids::PACE_ECDH_GM_AES_CBC_CMAC_128,
        KeyAgreement::EllipticDiffieHellman(get_brainpool_p256r1()),
        &Password::Mrz(mrz_key),
        None,
        &boxed_uint_from_be_slice(&hex!("
            7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C
            F21F249D 953BC46F 4C6E1925 9C010F99
        ")),
        None,
        &boxed_uint_from_be_slice(&hex!("
            A73FB703 AC1436A1 8E0CFA5A BB3F7BEC
            7A070E7A 6788486B EE230C4A 22762595
        ")),
    );
    assert!(matches!(result, Err(pace::Error::EqualEphemeralKeys)));
    assert!(service.channel().is_none());
}

#[test]
fn test_pace_fails_on_rejected_step() {
    // the chip rejects the protocol selection
    let (transport, _) = ScriptedTransport::new(vec![
        (
            hex!("00 22 C1 A4 0F 80 0A 04007F00070202040202 83 01 01").to_vec(),
            hex!("6A80").to_vec(),
        ),
    ]);
    let mut service = MrtdService::new(Box::new(transport));

    let mrz_key = MrzKey::new("T22000129", "640812", "101031").unwrap();
    let result = pace::establish_from_values(
        &mut service,
        oids::PACE_ECDH_GM_AES_CBC_CMAC_128,
        KeyAgreement::EllipticDiffieHellman(get_brainpool_p256r1()),
        &Password::Mrz(mrz_key),
        None,
        &boxed_uint_from_be_slice(&[0x02]),
        None,
        &boxed_uint_from_be_slice(&[0x03]),
    );
    assert!(matches!(result, Err(pace::Error::Failed { sw: Some(sw) }) if sw.0 == 0x6A80));
    assert!(service.channel().is_none());
}

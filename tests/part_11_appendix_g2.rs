//! Replays the PACE worked example of ICAO Doc 9303 Part 11 Appendix G.2
//! (classic Diffie-Hellman, generic mapping, AES-128) against a scripted
//! card.

mod common;

use hex_literal::hex;
use mrtd_terminal::crypt::dh::groups::get_modp_1024_160;
use mrtd_terminal::crypt::{boxed_uint_from_be_slice, KeyAgreement};
use mrtd_terminal::mrz::MrzKey;
use mrtd_terminal::pace::{self, oids, Password};
use mrtd_terminal::secure_messaging::ChannelCipher;
use mrtd_terminal::service::MrtdService;

use crate::common::ScriptedTransport;


fn appendix_g2_exchanges() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        // MSE:Set AT selecting PACE-DH-GM-AES-CBC-CMAC-128 with the MRZ
        (
            hex!("00 22 C1 A4 0F 80 0A 04007F00070202040102 83 01 01").to_vec(),
            hex!("9000").to_vec(),
        ),
        // step 1: encrypted nonce
        (
            hex!("10 86 00 00 02 7C00 00").to_vec(),
            hex!("7C 12 80 10 854D8DF5827FA6852D1A4FA701CDDDCA 9000").to_vec(),
        ),
        // step 2: mapping public keys (1024-bit group elements)
        (
            hex!("
                10 86 00 00 86
                7C 81 83 81 81 80
                23FB3749EA030D2A25B278D2A562047ADE3F01B74F17A15402CB7352CA7D2B3E
                B71C343DB13D1DEBCE9A3666DBCFC920B49174A602CB47965CAA73DC702489A4
                4D41DB914DE9613DC5E98C94160551C0DF86274B9359BC0490D01B03AD54022D
                CB4F57FAD6322497D7A1E28D46710F461AFE710FBBBC5F8BA166F4311975EC6C
                00
            ").to_vec(),
            hex!("
                7C 81 83 82 81 80
                78879F57225AA8080D52ED0FC890A4B25336F699AA89A2D3A189654AF70729E6
                23EA5738B26381E4DA19E004706FACE7B235C2DBF2F38748312F3C98C2DD4882
                A41947B324AA1259AC22579DB93F7085655AF30889DBB845D9E6783FE42C9F24
                49400306254C8AE8EE9DD812A804C0B66E8CAFC14F84D8258950A91B44126EE6
                9000
            ").to_vec(),
        ),
        // step 3: ephemeral public keys in the mapped group
        (
            hex!("
                10 86 00 00 86
                7C 81 83 83 81 80
                907D89E2D425A178AA81AF4A7774EC8E388C115CAE67031E85EECE520BD91155
                1B9AE4D04369F29A02626C86FBC6747CC7BC352645B6161A2A42D44EDA80A08F
                A8D61B76D3A154AD8A5A51786B0BC07147057871A922212C5F67F43173172236
                B7747D1671E6D692A3C7D40A0C3C5CE397545D015C175EB5130551EDBC2EE5D4
                00
            ").to_vec(),
            hex!("
                7C 81 83 84 81 80
                075693D9AE941877573E634B6E644F8E60AF17A0076B8B123D9201074D36152B
                D8B3A213F53820C42ADC79AB5D0AEEC3AEFB91394DA476BD97B9B14D0A65C1FC
                71A0E019CB08AF55E1F729005FBA7E3FA5DC41899238A250767A6D46DB974064
                386CD456743585F8E5D90CC8B4004B1F6D866C79CE0584E49687FF61BC29AEA1
                9000
            ").to_vec(),
        ),
        // step 4: authentication tokens
        (
            hex!("00 86 00 00 0C 7C 0A 85 08 B46DD9BD4D98381F 00").to_vec(),
            hex!("7C 0A 86 08 917F37B5C0E6D8D1 9000").to_vec(),
        ),
    ]
}

#[test]
fn test_pace_dh_gm_appendix_g2() {
    let (transport, position) = ScriptedTransport::new(appendix_g2_exchanges());
    let mut service = MrtdService::new(Box::new(transport));

    let mrz_key = MrzKey::new("T22000129", "640812", "101031").unwrap();
    let mapping_secret = boxed_uint_from_be_slice(&hex!("
        5265030F 751F4AD1 8B08AC56 5FC7AC95 2E41618D
    "));
    let agreement_secret = boxed_uint_from_be_slice(&hex!("
        89CCD99B 0E8D3B1F 11E1296D CA68EC53 411CF2CA
    "));

    let result = pace::establish_from_values(
        &mut service,
        oids::PACE_DH_GM_AES_CBC_CMAC_128,
        KeyAgreement::DiffieHellman(get_modp_1024_160()),
        &Password::Mrz(mrz_key),
        None,
        &mapping_secret,
        None,
        &agreement_secret,
    ).expect("failed to establish PACE");

    assert_eq!(position.get(), 5, "not every scripted exchange was used");

    assert_eq!(
        result.picc_nonce.as_slice(),
        hex!("FA5B7E3E49753A0DB9178B7B9BD898C8"),
    );
    assert_eq!(
        result.shared_secret.as_slice(),
        hex!("
            6BABC7B3 A72BCD7E A385E4C6 2DB2625B
            D8613B24 149E146A 629311C4 CA6698E3
            8B834B6A 9E9CD718 4BA8834A FF5043D4
            36950C4C 1E783236 7C10CB8C 314D40E5
            990B0DF7 013E64B4 549E2270 923D06F0
            8CFF6BD3 E977DDE6 ABE4C31D 55C0FA2E
            465E553E 77BDF75E 3193D383 4FC26E8E
            B1EE2FA1 E4FC97C1 8C3F6CFF FE2607FD
        "),
    );
    assert!(result.chip_authentication_data.is_none());

    // the mapped group carries the session generator of the worked example
    let KeyAgreement::DiffieHellman(mapped_group) = &result.ephemeral_agreement else {
        panic!("expected a classic Diffie-Hellman ephemeral agreement");
    };
    assert_eq!(
        mapped_group.generator().clone(),
        boxed_uint_from_be_slice(&hex!("
            7C9CBFE9 8F9FBDDA 8D143506 FA7D9306
            F4CB17E3 C71707AF F5E1C1A1 23702496
            84D64EE3 7AF44B8D BD9D45BF 6023919C
            BAA027AB 97ACC771 666C8E98 FF483301
            BFA4872D EDE9034E DFACB708 14166B7F
            36067682 9B826BEA 57291B5A D69FBC84
            EF1E7790 32A30580 3F743417 93E86974
            2D401325 B37EE856 5FFCDEE6 18342DC5
        ")).widen(mapped_group.generator().bits_precision()),
    );

    let channel = service.channel().expect("no secure channel installed");
    assert_eq!(channel.cipher(), ChannelCipher::Aes128);
    assert_eq!(channel.send_sequence_counter(), [0u8; 16]);
}

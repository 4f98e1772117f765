//! Replays the Basic Access Control worked example of ICAO Doc 9303 Part 11
//! Appendix D against a scripted card, down to the raw wire bytes.

mod common;

use hex_literal::hex;
use mrtd_terminal::bac;
use mrtd_terminal::iso7816::files::fid;
use mrtd_terminal::mrz::MrzKey;
use mrtd_terminal::service::MrtdService;

use crate::common::ScriptedTransport;


const RND_ICC: [u8; 8] = hex!("4608F91988702212");
const RND_IFD: [u8; 8] = hex!("781723860C06C226");
const K_IFD: [u8; 16] = hex!("0B795240CB7049B01C19B33E32804F0B");


fn appendix_d_exchanges() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        // GET CHALLENGE
        (
            hex!("00 84 00 00 08").to_vec(),
            hex!("4608F91988702212 9000").to_vec(),
        ),
        // EXTERNAL AUTHENTICATE with cryptogram and MAC
        (
            hex!("
                00 82 00 00 28
                72C29C2371CC9BDB65B779B8E8D37B29
                ECC154AA56A8799FAE2F498F76ED92F2
                5F1448EEA8AD90A7
                28
            ").to_vec(),
            hex!("
                46B9342A41396CD7386BF5803104D7CE
                DC122B9132139BAF2EEDC94EE178534F
                2F2D235D074D7449
                9000
            ").to_vec(),
        ),
        // protected SELECT EF.COM
        (
            hex!("0C A4 02 0C 15 8709016375432908C044F68E08BF8B92D635FF24F8 00").to_vec(),
            hex!("990290008E08FA855A5D4C50A8ED 9000").to_vec(),
        ),
        // protected READ BINARY of the first four bytes
        (
            hex!("0C B0 00 00 0D 9701048E08ED6705417E96BA55 00").to_vec(),
            hex!("8709019FF0EC34F9922651990290008E08AD55CC17140B2DED 9000").to_vec(),
        ),
        // protected READ BINARY of the remaining bytes
        (
            hex!("0C B0 00 04 0D 9701128E082EA28A70F3C7B535 00").to_vec(),
            hex!("
                871901FB9235F4E4037F2327DCC8964F1F9B8C30F42C8E2FFF224A
                990290008E08C8B2787EAEA07D74
                9000
            ").to_vec(),
        ),
    ]
}

#[test]
fn test_bac_session_appendix_d() {
    let (transport, position) = ScriptedTransport::new(appendix_d_exchanges());
    let mut service = MrtdService::new(Box::new(transport));

    let mrz_key = MrzKey::new("L898902C<", "690806", "940623").unwrap();
    assert_eq!(*mrz_key.bac_key_seed(), hex!("239AB9CB282DAF66231DC5A4DF6BFBAE"));

    bac::establish_from_values(
        &mut service,
        mrz_key.bac_key_seed().as_ref(),
        &RND_ICC,
        &RND_IFD,
        &K_IFD,
    ).expect("failed to establish BAC");
    assert!(service.channel().is_some());

    service.select_file(fid::EF_COM).expect("failed to select EF.COM");

    let first_four = service.read_binary(0, 4).expect("failed to read 4 bytes of EF.COM");
    assert_eq!(first_four, hex!("60145F01"));

    let rest = service.read_binary(4, 0x12).expect("failed to read rest of EF.COM");
    assert_eq!(rest, hex!("04303130365F36063034303030305C026175"));

    assert_eq!(position.get(), 5, "not every scripted exchange was used");
}

#[test]
fn test_bac_rejects_tampered_response_mac() {
    let k_seed = hex!("239AB9CB282DAF66231DC5A4DF6BFBAE");

    // the chip's reply carries a flipped final MAC byte
    let (transport, _) = ScriptedTransport::new(vec![
        (
            hex!("
                00 82 00 00 28
                72C29C2371CC9BDB65B779B8E8D37B29
                ECC154AA56A8799FAE2F498F76ED92F2
                5F1448EEA8AD90A7
                28
            ").to_vec(),
            hex!("
                46B9342A41396CD7386BF5803104D7CE
                DC122B9132139BAF2EEDC94EE178534F
                2F2D235D074D7448
                9000
            ").to_vec(),
        ),
    ]);
    let mut service = MrtdService::new(Box::new(transport));

    let result = bac::establish_from_values(
        &mut service,
        &k_seed,
        &RND_ICC,
        &RND_IFD,
        &K_IFD,
    );
    assert!(matches!(result, Err(bac::Error::ResponseMac)));
    assert!(service.channel().is_none());
}

//! End-to-end tests of the ELM327 engine against the scripted mock adapter.

use std::sync::Arc;
use std::time::Duration;

use evobd_driver::config::MockConfig;
use evobd_driver::{Elm327, Elm327Error, MockConnection, UdsClient};

fn initialized_engine(mock: MockConnection) -> Elm327 {
    let engine = Elm327::new(Box::new(mock));
    engine.initialize().unwrap();
    engine
}

#[test]
fn multi_frame_soc_request_with_spaced_response() {
    let engine = initialized_engine(MockConnection::new(MockConfig::default()));
    let response = engine.send_uds_message(0x7E4, 0x22, &[0x01, 0x01]).unwrap();

    assert_eq!(response.service_echo, 0x62);
    assert_eq!(response.data_identifier, Some(0x0101));
    // SOC raw value at byte 4 of the stripped payload
    assert_eq!(response.payload[4], 0x69);
    assert_eq!(response.payload[4] as f64 / 2.0, 52.5);
    // Declared ISO-TP length 0x3E minus echo and DID
    assert_eq!(response.payload.len(), 0x3E - 3);
}

#[test]
fn no_data_raises_no_response_with_token() {
    let mut mock = MockConnection::new(MockConfig::default());
    mock.add_response("220180", "SEARCHING...\rNO DATA\r\r>");
    let engine = initialized_engine(mock);

    match engine.send_uds_message(0x7E4, 0x22, &[0x01, 0x80]) {
        Err(Elm327Error::NoResponse(token)) => assert_eq!(token, "NO DATA"),
        other => panic!("expected NoResponse, got {other:?}"),
    }
}

#[test]
fn compact_single_frame_response() {
    let mut mock = MockConnection::new(MockConfig::default());
    // ATS0-style dump: no spaces anywhere
    mock.add_response("ATSH7DF", "OK\r\r>");
    mock.add_response("010D", "7EC06410D000000\r\r>");
    let engine = initialized_engine(mock);

    let response = engine.send_uds_message(0x7DF, 0x01, &[0x0D]).unwrap();
    assert_eq!(response.service_echo, 0x41);
    assert_eq!(response.data_identifier, None);
    assert_eq!(response.payload, vec![0x0D, 0x00, 0x00, 0x00]);
}

#[test]
fn spaced_and_compact_responses_decode_identically() {
    let spaced = "7EC 10 3E 62 01 01 EF FB E7 \r7EC 21 ED 69 00 00 00 00 00 \r\
                  7EC 22 00 00 0E 26 0D 0C 0D \r7EC 23 0D 0D 00 00 00 34 BC \r\
                  7EC 24 18 BC 56 00 00 7C 00 \r7EC 25 02 DE 80 00 02 C9 55 \r\
                  7EC 26 00 01 19 AF 00 01 07 \r7EC 27 C3 00 EC 65 6F 00 00 \r\
                  7EC 28 03 00 00 00 00 0B B8 \r\r>";
    let compact = spaced.replace(' ', "");

    let mut spaced_mock = MockConnection::new(MockConfig::default());
    spaced_mock.add_response("220101", spaced);
    let mut compact_mock = MockConnection::new(MockConfig::default());
    compact_mock.add_response("220101", compact);

    let a = initialized_engine(spaced_mock)
        .send_uds_message(0x7E4, 0x22, &[0x01, 0x01])
        .unwrap();
    let b = initialized_engine(compact_mock)
        .send_uds_message(0x7E4, 0x22, &[0x01, 0x01])
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn negative_response_surfaces_nrc() {
    let mut mock = MockConnection::new(MockConfig::default());
    // Single frame: 7F 22 31 (RequestOutOfRange)
    mock.add_response("22FFFF", "7EC 03 7F 22 31 \r\r>");
    let engine = initialized_engine(mock);

    match engine.send_uds_message(0x7E4, 0x22, &[0xFF, 0xFF]) {
        Err(Elm327Error::NegativeResponse { service, nrc }) => {
            assert_eq!(service, 0x22);
            assert_eq!(u8::from(nrc), 0x31);
        }
        other => panic!("expected NegativeResponse, got {other:?}"),
    }
}

#[test]
fn skipped_consecutive_sequence_is_rejected() {
    let mut mock = MockConnection::new(MockConfig::default());
    // First frame then sequence 2: sequence 1 is missing
    mock.add_response(
        "220101",
        "7EC 10 10 AA AA AA AA AA \r7EC 22 BB BB BB BB BB BB BB \r\r>",
    );
    let engine = initialized_engine(mock);

    assert!(matches!(
        engine.send_uds_message(0x7E4, 0x22, &[0x01, 0x01]),
        Err(Elm327Error::IsoTp(_))
    ));
}

#[test]
fn tester_present_toggling() {
    let mock = MockConnection::new(MockConfig::default());
    let transcript = mock.transcript();
    let engine = initialized_engine(mock);

    engine.start_tester_present(Duration::from_millis(300));
    std::thread::sleep(Duration::from_millis(1000));
    engine.stop_tester_present();

    let ticks_after_stop = {
        let sent = transcript.lock();
        sent.iter().filter(|c| *c == "3E00").count()
    };
    assert!(
        ticks_after_stop >= 2,
        "expected at least 2 keep-alive ticks, saw {ticks_after_stop}"
    );

    std::thread::sleep(Duration::from_millis(700));
    let ticks_later = {
        let sent = transcript.lock();
        sent.iter().filter(|c| *c == "3E00").count()
    };
    assert_eq!(ticks_after_stop, ticks_later, "keep-alive kept running after stop");
}

#[test]
fn concurrent_uds_calls_serialize() {
    let mock = MockConnection::new(MockConfig::default());
    let transcript = mock.transcript();
    let engine = Arc::new(initialized_engine(mock));
    let client = UdsClient::new(engine);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let client = client.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..5 {
                let did = if (worker + i) % 2 == 0 { 0x0101 } else { 0x0102 };
                // A torn exchange would hand this thread another thread's
                // response and fail the DID check inside the client.
                client.read_data_by_identifier(0x7E4, did).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let sent = transcript.lock();
    let reads = sent
        .iter()
        .filter(|c| *c == "220101" || *c == "220102")
        .count();
    assert_eq!(reads, 20);
    // Every wire command must be one of the known whole strings.
    for command in sent.iter() {
        assert!(
            ["ATZ", "ATE0", "ATL0", "ATS0", "ATH1", "ATSP0", "ATSH7E4", "220101", "220102"]
                .contains(&command.as_str()),
            "unexpected or torn command on the wire: {command:?}"
        );
    }
}

#[test]
fn recovery_after_timeout_via_flush() {
    let mut mock = MockConnection::new(MockConfig::default());
    // Truncated response: no prompt ever arrives
    mock.add_response("220199", "7EC 10 3E 62 01 99");
    let engine = initialized_engine(mock);

    match engine.send_uds_message(0x7E4, 0x22, &[0x01, 0x99]) {
        Err(Elm327Error::Connection(_)) => {}
        other => panic!("expected connection timeout, got {other:?}"),
    }

    // Explicit recovery: flush, then a fresh command succeeds.
    engine.flush_input().unwrap();
    let response = engine.send_uds_message(0x7E4, 0x22, &[0x01, 0x01]).unwrap();
    assert_eq!(response.service_echo, 0x62);
}

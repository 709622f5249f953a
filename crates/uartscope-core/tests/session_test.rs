use serde_json::{json, Value};
use uartscope_core::{
    ConfigPatch, RxLog, ScopeHistory, Session, SessionConfig, SimEvent, TextEncoding,
};
use uartscope_decode::{
    Dot, FrameConfig, FrameConfigPatch, Parity, RxErrorKind, TimeSpan, UartChar,
};

fn run_until_complete(session: &mut Session, scope: &mut ScopeHistory, log: &mut RxLog) -> Vec<SimEvent> {
    let mut tail = Vec::new();
    for _ in 0..600 {
        for event in session.run_frame() {
            match &event {
                SimEvent::Data(batch) => scope.push_batch(batch),
                SimEvent::RxData(c) => log.push(*c),
                _ => {}
            }
            let done = event == SimEvent::TxComplete;
            tail.push(event);
            if done {
                return tail;
            }
        }
    }
    panic!("burst never completed");
}

#[test]
fn seven_bit_odd_two_stop_link_carries_text() {
    let frame = FrameConfig { data_bits: 7, parity: Parity::Odd, stop_bits: 2, idle_bits: 1.5 };
    let mut session = Session::new(SessionConfig {
        tx_baud: 2400.0,
        rx_baud: 2400.0,
        tx_frame: frame,
        rx_frame: frame,
        ..Default::default()
    })
    .unwrap();
    let mut scope = ScopeHistory::default();
    let mut log = RxLog::default();

    session.transmit_str("Link OK").unwrap();
    let events = run_until_complete(&mut session, &mut scope, &mut log);

    assert!(!events.iter().any(|e| matches!(e, SimEvent::RxError(_))));
    assert_eq!(log.to_text(TextEncoding::Auto), "Link OK");
    assert_eq!(session.stats().frames_ok, 7);

    let everything = TimeSpan { start_s: 0.0, end_s: session.axis_time() + 1.0 };
    let parity_dots = scope.points_in(everything).filter(|p| p.2 == Dot::Parity).count();
    assert_eq!(parity_dots, 7);
    let span = scope.visible_span(2400.0).unwrap();
    assert!((span.duration() - 50.0 / 2400.0).abs() < 1e-12);
}

#[test]
fn baud_mismatch_shows_up_in_log_and_stats() {
    let even = FrameConfigPatch { parity: Some(Parity::Even), ..Default::default() };
    let mut session = Session::new(SessionConfig::default()).unwrap();
    session
        .configure(&ConfigPatch {
            rx_baud: Some(4800.0),
            tx_config: Some(even),
            rx_config: Some(even),
            ..Default::default()
        })
        .unwrap();
    let mut scope = ScopeHistory::default();
    let mut log = RxLog::default();

    session.transmit(b'A');
    run_until_complete(&mut session, &mut scope, &mut log);

    assert!(log.error_count() >= 1);
    assert!(log.to_hex().contains('!'));
    assert!(session.stats().parity_errors >= 1);
}

#[test]
fn events_serialize_with_type_and_payload() {
    let data = serde_json::to_value(SimEvent::RxData(UartChar { byte: 0x41, error: false })).unwrap();
    assert_eq!(data, json!({"type": "RX_DATA", "payload": {"byte": 65, "error": false}}));

    let err = serde_json::to_value(SimEvent::RxError(RxErrorKind::Framing)).unwrap();
    assert_eq!(err, json!({"type": "RX_ERROR", "payload": "FRAMING_ERROR"}));

    let done = serde_json::to_value(SimEvent::TxComplete).unwrap();
    assert_eq!(done, json!({"type": "TX_COMPLETE"}));
}

#[test]
fn sample_batch_serializes_as_parallel_arrays() {
    let mut session = Session::new(SessionConfig { rx_baud: 300.0, tx_baud: 300.0, ..Default::default() }).unwrap();
    let events = session.run_frame();
    let value: Value = serde_json::to_value(&events[0]).unwrap();

    assert_eq!(value["type"], "DATA");
    let payload = &value["payload"];
    // 300 baud samples at 3000 Hz, 50 steps per host tick
    assert_eq!(payload["times"].as_array().unwrap().len(), 50);
    assert_eq!(payload["levels"][0], 1);
    assert_eq!(payload["dots"][0], "none");
}

#[test]
fn patches_deserialize_from_partial_json() {
    let patch: ConfigPatch =
        serde_json::from_str(r#"{"tx_config":{"parity":"odd"},"rx_baud":1200}"#).unwrap();
    let mut session = Session::new(SessionConfig::default()).unwrap();
    session.configure(&patch).unwrap();

    let cfg = session.config();
    assert_eq!(cfg.tx_frame.parity, Parity::Odd);
    assert_eq!(cfg.rx_frame.parity, Parity::None);
    assert_eq!(cfg.rx_baud, 1200.0);
}

#[test]
fn reset_mid_frame_leaves_a_quiet_line() {
    let mut session = Session::new(SessionConfig { tx_baud: 300.0, rx_baud: 300.0, ..Default::default() }).unwrap();
    session.transmit_str("slow").unwrap();
    session.run_frame();
    session.reset();

    for _ in 0..10 {
        let events = session.run_frame();
        assert_eq!(events.len(), 1);
        let SimEvent::Data(batch) = &events[0] else {
            panic!("expected a sample batch");
        };
        assert!(batch.levels.iter().all(|&l| l == 1));
        assert_eq!(batch.marked().count(), 0);
    }
}

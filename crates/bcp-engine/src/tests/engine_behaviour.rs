//! Registry behaviour: configuration, fan-out, goodbyes, and display frames.

use std::sync::Arc;

use bcp_config::{BcpConfig, ConnectionConfig, EventMapping};
use bcp_wire::ValueCase;
use rstest::{fixture, rstest};

use super::support::{FakePeer, RecordingHost, sole_status, start_with_peer, wait_until};
use crate::{Command, ConnectionState, Engine, EngineError, Params, PlayerVariableFilter};

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

#[fixture]
fn host() -> Arc<RecordingHost> {
    RecordingHost::new()
}

#[fixture]
fn listener() -> FakePeer {
    FakePeer::bind().expect("bind peer")
}

#[rstest]
fn outbound_command_follows_hello(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host);
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    assert_eq!(engine.send("trigger", params(&[("name", "ball_start")])), 1);

    assert_eq!(peer.read_line().expect("trigger"), "trigger?name=ball_start");
}

#[rstest]
fn inbound_hello_is_handled_on_arrival(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host.clone());
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    peer.send_line("hello?version=1.0").expect("send hello");
    peer.send_line("trigger?name=ball_start").expect("send trigger");

    let mut dispatched = 0;
    assert!(wait_until(|| {
        dispatched += engine.poll();
        dispatched >= 1
    }));
    assert_eq!(dispatched, 1);
    assert_eq!(engine.poll(), 0);
    let names: Vec<String> = host
        .take_events()
        .iter()
        .map(|event| event.name().to_owned())
        .collect();
    assert_eq!(names, ["trigger_ball_start"]);

    let status = sole_status(&engine).expect("status");
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(status.owes_goodbye);
    assert_eq!(engine.send_command(&Command::reset()), 1);
    assert_eq!(peer.read_line().expect("next line"), "reset");
}

#[rstest]
fn fan_out_reaches_every_peer(host: Arc<RecordingHost>) {
    let first = FakePeer::bind().expect("bind first");
    let second = FakePeer::bind().expect("bind second");
    let mut engine = Engine::new(host);
    engine
        .configure([
            (String::from("display"), first.config()),
            (String::from("media"), second.config()),
        ])
        .expect("configure");
    engine.start().expect("start");
    let mut first_session = first.accept().expect("accept first");
    let mut second_session = second.accept().expect("accept second");
    first_session.expect_hello().expect("first hello");
    second_session.expect_hello().expect("second hello");

    assert_eq!(engine.send_command(&Command::reset()), 2);

    assert_eq!(first_session.read_line().expect("first reset"), "reset");
    assert_eq!(second_session.read_line().expect("second reset"), "reset");
    assert_eq!(engine.outbox().len(), 2);
}

#[rstest]
fn display_frames_bypass_the_host_tick(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host.clone());
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    peer.send_raw(b"dmd_frame?\x00\xff\x7f\n").expect("send frame");

    assert!(wait_until(|| host.frames().len() == 1));
    assert_eq!(host.frames(), vec![vec![0x00, 0xff, 0x7f]]);
    assert_eq!(host.event_count(), 0);
}

#[rstest]
fn required_peer_goodbye_requests_shutdown(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host.clone());
    let config = listener.config().with_require_connection(true);
    let mut peer = start_with_peer(&mut engine, &listener, config).expect("session");

    peer.send_line("goodbye").expect("send goodbye");

    assert!(wait_until(|| host.shutdown_requests() == 1));
    peer.expect_closed().expect("closed without goodbye");
    assert!(wait_until(|| {
        engine.poll();
        engine.connection_status().is_empty()
    }));
    assert!(engine.shutdown_requested());
    assert_eq!(engine.send_command(&Command::reset()), 0);

    engine.shutdown();
    assert_eq!(host.shutdown_requests(), 1);
}

#[rstest]
fn optional_peer_goodbye_only_removes_connection(
    host: Arc<RecordingHost>,
    listener: FakePeer,
) {
    let mut engine = Engine::new(host.clone());
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    peer.send_line("goodbye").expect("send goodbye");

    peer.expect_closed().expect("closed without goodbye");
    assert!(wait_until(|| {
        engine.poll();
        engine.connection_status().is_empty()
    }));
    assert_eq!(host.shutdown_requests(), 0);
    assert!(!engine.shutdown_requested());
}

#[rstest]
fn commands_queued_before_goodbye_are_still_dispatched(
    host: Arc<RecordingHost>,
    listener: FakePeer,
) {
    let mut engine = Engine::new(host.clone());
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    peer.send_line("trigger?name=last_call").expect("send trigger");
    peer.send_line("goodbye").expect("send goodbye");
    peer.expect_closed().expect("closed");

    assert!(wait_until(|| {
        engine.poll();
        engine.connection_status().is_empty()
    }));
    let names: Vec<String> = host
        .take_events()
        .iter()
        .map(|event| event.name().to_owned())
        .collect();
    assert_eq!(names, ["trigger_last_call"]);
}

#[rstest]
fn configure_rejects_duplicate_names(host: Arc<RecordingHost>) {
    let mut engine = Engine::new(host);
    engine
        .configure([(String::from("media"), ConnectionConfig::new("localhost"))])
        .expect("first configure");

    let result = engine.configure([
        (String::from("display"), ConnectionConfig::new("localhost")),
        (String::from("media"), ConnectionConfig::new("localhost")),
    ]);

    assert!(matches!(
        result,
        Err(EngineError::DuplicateConnection { name }) if name == "media"
    ));
    assert_eq!(engine.connection_status().len(), 1);
}

#[rstest]
fn configure_rejects_blank_hosts(host: Arc<RecordingHost>) {
    let mut engine = Engine::new(host);

    let result = engine.configure([(String::from("media"), ConnectionConfig::new("  "))]);

    assert!(matches!(result, Err(EngineError::EmptyHost { .. })));
    assert!(engine.connection_status().is_empty());
}

#[rstest]
fn lifecycle_calls_are_checked(host: Arc<RecordingHost>) {
    let mut engine = Engine::new(host);
    engine.start().expect("first start");

    assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));

    engine.shutdown();
    engine.shutdown();
    assert!(matches!(engine.start(), Err(EngineError::ShutDown)));
    assert!(matches!(
        engine.configure([(String::from("media"), ConnectionConfig::new("localhost"))]),
        Err(EngineError::ShutDown)
    ));
}

#[rstest]
fn configured_connections_wait_for_start(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host);
    engine
        .configure([(String::from("media"), listener.config())])
        .expect("configure");

    let status = sole_status(&engine).expect("status");
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.attempts_made, 0);
    assert_eq!(status.name, "media");
}

#[rstest]
fn from_config_builds_connections_and_event_map(host: Arc<RecordingHost>, listener: FakePeer) {
    let config = BcpConfig::default()
        .with_connection("media", listener.config())
        .with_event_mapping(
            "ball_started",
            EventMapping::new("ball_start")
                .with_param("player", "%player")
                .with_param("name", "%name%"),
        )
        .with_player_variables(["ramps"]);
    let mut engine = Engine::from_config(&config, host).expect("engine from config");
    engine.start().expect("start");
    let mut peer = listener.accept().expect("accept");
    peer.expect_hello().expect("hello");

    assert!(engine.send_mapped(
        "ball_started",
        &params(&[("player", "1")]),
        &params(&[("name", "ada")]),
    ));
    assert!(!engine.send_mapped("tilt", &Params::new(), &Params::new()));
    assert!(engine.player_variable_changed("ramps", "4", "3", "1"));
    assert!(!engine.player_variable_changed("loops", "1", "0", "1"));
    assert!(engine.player_variable_changed("score", "1500", "1000", "500"));

    assert_eq!(
        peer.read_line().expect("mapped"),
        "ball_start?name=ada&player=1"
    );
    assert_eq!(
        peer.read_line().expect("variable"),
        "player_variable?change=1&name=ramps&prev_value=3&value=4"
    );
    assert_eq!(
        peer.read_line().expect("score"),
        "player_score?change=500&prev_value=1000&value=1500"
    );
}

#[rstest]
fn from_config_rejects_invalid_configuration(host: Arc<RecordingHost>) {
    let config = BcpConfig::default().with_connection("media", ConnectionConfig::new(""));

    let result = Engine::from_config(&config, host);

    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[rstest]
#[case(ValueCase::Preserve, "trigger_Pong", "Fast")]
#[case(ValueCase::Lowercase, "trigger_pong", "fast")]
fn value_case_controls_inbound_values(
    host: Arc<RecordingHost>,
    listener: FakePeer,
    #[case] value_case: ValueCase,
    #[case] event_name: &str,
    #[case] mode: &str,
) {
    let mut engine = Engine::new(host.clone()).with_value_case(value_case);
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    peer.send_line("Trigger?Name=Pong&Mode=Fast").expect("send trigger");
    assert!(wait_until(|| {
        engine.poll();
        host.event_count() == 1
    }));

    let event = host.take_events().pop().expect("event");
    assert_eq!(event.name(), event_name);
    assert_eq!(event.fields().get("mode").map(String::as_str), Some(mode));
}

#[rstest]
fn player_filter_can_forward_everything(host: Arc<RecordingHost>, listener: FakePeer) {
    let mut engine = Engine::new(host).with_player_variables(PlayerVariableFilter::All);
    let mut peer =
        start_with_peer(&mut engine, &listener, listener.config()).expect("session");

    assert!(engine.player_variable_changed("loops", "2", "1", "1"));

    assert_eq!(
        peer.read_line().expect("variable"),
        "player_variable?change=1&name=loops&prev_value=1&value=2"
    );
}

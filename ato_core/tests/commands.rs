use ato_core::error::AtoError;
use ato_core::mocks::{MemoryTelemetry, UnreachableTelemetry};
use ato_core::telemetry::Publisher;
use ato_core::{Command, SensorRole, Topics};
use rstest::rstest;

#[rstest]
#[case("aquarium/cmd/pump", "ON", Command::ManualTrigger)]
#[case("aquarium/cmd/disable", "", Command::Disable)]
#[case("aquarium/cmd/enable", "1", Command::Enable)]
#[case("aquarium/cmd/refill", " 4.75 ", Command::Refill { liters: 4.75 })]
#[case(
    "aquarium/cmd/temp/display_offset",
    "-0.3",
    Command::SetOffset { role: SensorRole::Display, offset: -0.3 }
)]
#[case(
    "aquarium/cmd/temp/ato_offset",
    "1.2",
    Command::SetOffset { role: SensorRole::Reservoir, offset: 1.2 }
)]
fn parses_command_topics(#[case] topic: &str, #[case] payload: &str, #[case] expected: Command) {
    assert_eq!(Command::parse("aquarium", topic, payload).unwrap(), Some(expected));
}

#[rstest]
#[case("aquarium/cmd/refill", "lots")]
#[case("aquarium/cmd/temp/sump_offset", "NaN")]
#[case("aquarium/cmd/temp/sump_offset", "")]
fn rejects_bad_payloads(#[case] topic: &str, #[case] payload: &str) {
    let err = Command::parse("aquarium", topic, payload).unwrap_err();
    assert!(matches!(err, AtoError::InvalidCalibrationInput(_)), "{err}");
}

#[rstest]
#[case("aquarium/cmd/reboot")]
#[case("aquarium/cmd/temp/garage_offset")]
fn rejects_unknown_commands(#[case] topic: &str) {
    assert!(matches!(
        Command::parse("aquarium", topic, "1"),
        Err(AtoError::State(_))
    ));
}

#[test]
fn publisher_swallows_sink_failures() {
    let mut p = Publisher::new(UnreachableTelemetry, Topics::new("aquarium"));
    assert!(!p.publish("aquarium/pump/state", "{}"));
    assert!(!p.publish_number("aquarium/reservoir/level", 4.2));
    assert_eq!(p.failures(), 2);
}

#[test]
fn publisher_serializes_json() {
    let sink = MemoryTelemetry::new();
    let mut p = Publisher::new(sink.clone(), Topics::new("tank"));
    #[derive(serde::Serialize)]
    struct Body {
        level: f64,
    }
    assert!(p.publish_json("tank/x", &Body { level: 1.5 }));
    assert_eq!(sink.payloads("tank/x"), vec![r#"{"level":1.5}"#.to_string()]);
}

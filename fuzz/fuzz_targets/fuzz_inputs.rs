#![no_main]
use libfuzzer_sys::fuzz_target;

// Untrusted text reaching the controller: kernel probe output and
// `topic payload` command lines.
fuzz_target!(|data: &str| {
    if let Ok(t) = ato_core::temperature::parse_w1_slave(data) {
        assert!(t.is_finite());
    }
    let (topic, payload) = data.split_once(' ').unwrap_or((data, ""));
    if let Ok(Some(ato_core::Command::SetOffset { offset, .. })) =
        ato_core::Command::parse("aquarium", topic, payload)
    {
        assert!(offset.is_finite());
    }
});

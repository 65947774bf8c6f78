#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use relay_rules::RuleEngine;

static ENGINE: OnceLock<RuleEngine> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let engine = ENGINE.get_or_init(RuleEngine::default);

    let first = engine.answer(&text);
    assert!(!first.text.trim().is_empty());
    assert!(engine.matcher_names().contains(&first.matcher));

    let again = engine.answer(&text);
    assert_eq!(first, again);
});

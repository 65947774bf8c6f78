#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_rules::{evaluate, format_number};

fuzz_target!(|data: &[u8]| {
    let expression = String::from_utf8_lossy(data);
    if let Ok(value) = evaluate(&expression) {
        assert!(value.is_finite());
        let rendered = format_number(value);
        assert!(!rendered.is_empty());
        assert_ne!(rendered, "-0");
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = faultline_model::FaultConfig::from_json(s) {
            // Whatever decodes must re-encode to an equal config.
            let canonical = config.canonical_json().expect("encode decoded config");
            let again = faultline_model::FaultConfig::from_json(&canonical)
                .expect("canonical form decodes");
            assert_eq!(again, config);
        }
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    // Any SUT output line either decodes or is rejected, never panics.
    if let Ok(entry) = faultline_trace::decode_line(&line) {
        let _ = entry.event.verdict();
    }
    let _ = faultline_trace::adapt_trace(faultline_trace::AdapterKind::Diagnostic, &line);
    let _ = faultline_trace::adapt_trace(faultline_trace::AdapterKind::SpecLog, &line);
});

//! Fuzz the filter tree evaluator with arbitrary JSON filter/context pairs.
#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(val) = serde_json::from_str::<serde_json::Value>(s) {
            let filter_val = val.get("filter").cloned().unwrap_or(serde_json::Value::Null);
            let context_val = val.get("context").cloned().unwrap_or(serde_json::Value::Null);
            if let Ok(filter) = serde_json::from_value::<flagcore::Filter>(filter_val) {
                let flat = flagcore::context::flatten(&context_val);
                let mut missing = flagcore::MissingFields::new();
                let now = chrono::Utc::now();
                // Must never panic regardless of how deeply nested or
                // malformed the filter tree is.
                let _ = flagcore::filter::eval_filter(&filter, "fuzz-flag", &flat, &mut missing, now);
            }
        }
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;

// Parsing and validation must reject bad input without panicking, and a
// config that validates must map onto the core types.
fuzz_target!(|data: &str| {
    let Ok(cfg) = tracer_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        let nav = tracer_core::NavigatorCfg::from(&cfg);
        let _ = tracer_core::builder::validate(&nav);
    }
});

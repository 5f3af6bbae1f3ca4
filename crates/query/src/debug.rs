//! Feature-gated build diagnostics.
//!
//! With the `debug-log` feature enabled (wasm targets), builder and
//! optimizer decisions are traced to the console; by default the macro
//! compiles to nothing.

#[cfg(feature = "debug-log")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        web_sys::console::log_1(&web_sys::wasm_bindgen::JsValue::from(alloc::format!($($arg)*)))
    };
}

#[cfg(not(feature = "debug-log"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

//! Maps `Box<dyn Error>` from trait boundaries to typed `TracerError`.
//!
//! The traits in `tracer_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `tracer_hardware::HwError`.

use crate::error::TracerError;

/// Map a trait-boundary error to a typed `TracerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TracerError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<tracer_hardware::error::HwError>() {
            return match hw {
                tracer_hardware::error::HwError::Timeout => TracerError::Timeout,
                other => TracerError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        TracerError::Timeout
    } else {
        TracerError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_maps_to_timeout() {
        let e = std::io::Error::other("adc read timeout");
        assert!(matches!(map_hw_error(&e), TracerError::Timeout));
    }

    #[test]
    fn other_text_maps_to_hardware() {
        let e = std::io::Error::other("spi bus busy");
        match map_hw_error(&e) {
            TracerError::Hardware(msg) => assert!(msg.contains("spi bus busy")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_hw_error_is_downcast() {
        let e = tracer_hardware::error::HwError::Spi("no device".into());
        assert!(matches!(map_hw_error(&e), TracerError::HardwareFault(_)));
        let t = tracer_hardware::error::HwError::Timeout;
        assert!(matches!(map_hw_error(&t), TracerError::Timeout));
    }
}

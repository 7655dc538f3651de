//! Maps `Box<dyn Error>` from trait boundaries to typed `AtoError`.
//!
//! The traits in `ato_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `ato_hardware::HwError` downcasting.

use crate::error::AtoError;

/// Map a trait-boundary error to a typed `AtoError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> AtoError {
    #[cfg(feature = "hardware-errors")]
    {
        use ato_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::DeviceNotPresent(id) => AtoError::SensorUnavailable(id.clone()),
                HwError::BusMissing(root) => {
                    AtoError::SensorUnavailable(format!("one-wire bus {root}"))
                }
                other => AtoError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("not present") || lower.contains("no such") || lower.contains("timeout") {
        AtoError::SensorUnavailable(s)
    } else {
        AtoError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_fallback_classifies_missing_devices() {
        let e: Box<dyn std::error::Error + Send + Sync> = "device not present".into();
        assert!(matches!(map_hw_error(&*e), AtoError::SensorUnavailable(_)));
        let e: Box<dyn std::error::Error + Send + Sync> = "bus fault".into();
        assert!(matches!(map_hw_error(&*e), AtoError::Hardware(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn downcasts_hw_error() {
        let e: Box<dyn std::error::Error + Send + Sync> = Box::new(
            ato_hardware::error::HwError::DeviceNotPresent("28-abc".into()),
        );
        match map_hw_error(&*e) {
            AtoError::SensorUnavailable(id) => assert_eq!(id, "28-abc"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

//! Raspberry Pi GPIO adapters (rppal).

use ato_traits::{BoxError, FloatSwitch, PumpRelay};
use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::error::{HwError, Result};

/// Float switch wired between the pin and ground with the internal pull-up.
pub struct GpioFloatSwitch {
    pin: InputPin,
    /// Pin level that means "water low".
    low_when_high: bool,
}

impl GpioFloatSwitch {
    pub fn new(pin: u8, low_when_high: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("open float switch pin {pin}: {e}")))?
            .into_input_pullup();
        Ok(Self { pin, low_when_high })
    }
}

impl FloatSwitch for GpioFloatSwitch {
    fn is_low(&mut self) -> std::result::Result<bool, BoxError> {
        let high = self.pin.is_high();
        Ok(high == self.low_when_high)
    }
}

/// Relay output. The pin is driven HIGH as soon as it is claimed so the
/// pump cannot start while the controller is still booting.
pub struct GpioPumpRelay {
    pin: OutputPin,
}

impl GpioPumpRelay {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("open pump relay pin {pin}: {e}")))?
            .into_output_high();
        // Keep the relay released if the process exits without a clean shutdown.
        pin.set_reset_on_drop(false);
        Ok(Self { pin })
    }
}

impl PumpRelay for GpioPumpRelay {
    fn set_level(&mut self, high: bool) -> std::result::Result<(), BoxError> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

impl Drop for GpioPumpRelay {
    fn drop(&mut self) {
        self.pin.set_high();
    }
}

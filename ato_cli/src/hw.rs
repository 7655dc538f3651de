//! Hardware assembly: rppal GPIO and sysfs one-wire with the `hardware`
//! feature, a simulated sump and probes otherwise.

use ato_traits::{FloatSwitch, PumpRelay, SensorBus};

pub struct Hardware {
    pub float: Box<dyn FloatSwitch + Send>,
    pub relay: Box<dyn PumpRelay + Send>,
    pub bus: Box<dyn SensorBus + Send>,
    pub backend: &'static str,
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open(cfg: &ato_config::Config) -> eyre::Result<Hardware> {
    use eyre::WrapErr;

    let relay = ato_hardware::gpio::GpioPumpRelay::new(cfg.pins.pump_relay)
        .wrap_err("open pump relay")?;
    let float = ato_hardware::gpio::GpioFloatSwitch::new(
        cfg.pins.float_switch,
        cfg.pins.float_low_when_high,
    )
    .wrap_err("open float switch")?;
    tracing::info!(
        float_pin = cfg.pins.float_switch,
        relay_pin = cfg.pins.pump_relay,
        w1_root = %cfg.temperature.w1_root,
        "gpio hardware opened"
    );
    Ok(Hardware {
        float: Box::new(float),
        relay: Box::new(relay),
        bus: Box::new(ato_hardware::w1::SysfsW1Bus::new(&cfg.temperature.w1_root)),
        backend: "gpio",
    })
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open(cfg: &ato_config::Config) -> eyre::Result<Hardware> {
    let _ = &cfg.pins;
    let sump = ato_hardware::SimulatedSump::default();
    tracing::info!("using simulated sump and probes");
    Ok(Hardware {
        float: Box::new(sump.float_switch()),
        relay: Box::new(sump.relay()),
        bus: Box::new(ato_hardware::SimulatedSensorBus::reef_defaults()),
        backend: "simulated",
    })
}

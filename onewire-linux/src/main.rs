use std::{
    fmt::Debug,
    io::{self, Write},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use embedded_hal::digital::{InputPin, OutputPin};
use linux_embedded_hal::{
    CdevPin, Delay,
    gpio_cdev::{Chip, LineRequestFlags},
};
use onewire_bitbang::{
    Line, OneWire, OneWireError, OneWireMasterBuilder, OneWireSearch, OneWireSearchKind, Rom,
    sim::{SimDevice, SimLine},
};
use onewire_gpio::GpioLine;

/// Devices a simulated bus can hold.
const SIM_CAPACITY: usize = 16;
/// Release/sample cycles used to measure the latency of a GPIO line.
const LATENCY_SAMPLES: usize = 16;

/// Scan and address devices on a bit-banged 1-Wire bus
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// GPIO character device the bus is wired to
    #[arg(short, long, default_value = "/dev/gpiochip0")]
    chip: String,
    /// Line offset of the bus pin on the GPIO chip
    #[arg(short, long, required_unless_present = "simulate")]
    line: Option<u32>,
    /// Use a simulated bus with a device at this ROM code (repeatable)
    #[arg(long, value_name = "ROM", conflicts_with = "line")]
    simulate: Vec<Rom>,
    /// Read sample point, in microseconds after the falling edge of a slot
    #[arg(long, default_value_t = 13)]
    sample_point_us: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// List the ROM codes of the devices on the bus
    Scan {
        /// Only list devices of this family code (hex)
        #[arg(short, long, value_parser = parse_family)]
        family: Option<u8>,
        /// Only list devices with an alarm condition
        #[arg(short, long)]
        alarm: bool,
    },
    /// Check that a device is on the bus
    Verify {
        /// ROM code of the device
        rom: Rom,
    },
    /// Read the ROM code of the only device on the bus
    ReadRom,
}

fn parse_family(s: &str) -> Result<u8, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid family code {s:?}: {e}"))
}

fn bus_error<E: Debug>(err: OneWireError<E>) -> anyhow::Error {
    anyhow!("1-Wire bus error: {err}")
}

fn open_gpio(path: &str, offset: u32) -> Result<GpioLine<CdevPin, Delay>> {
    let mut chip = Chip::new(path).with_context(|| format!("Failed to open GPIO chip {path}"))?;
    let handle = chip
        .get_line(offset)
        .with_context(|| format!("No line {offset} on {path}"))?
        .request(
            LineRequestFlags::OUTPUT | LineRequestFlags::OPEN_DRAIN,
            1,
            env!("CARGO_PKG_NAME"),
        )
        .with_context(|| format!("Failed to request line {offset} on {path}"))?;
    let mut pin = CdevPin::new(handle).map_err(|e| anyhow!("Failed to set up GPIO pin: {e:?}"))?;
    let latency_us = measure_release_latency(&mut pin)?;
    log::info!("GPIO line {offset} on {path}, release latency {latency_us} us");
    Ok(GpioLine::new(pin, Delay).with_release_latency_us(latency_us))
}

/// Worst observed time from releasing the pin until its level can be read
/// back, rounded up to the next microsecond.
fn measure_release_latency<P: OutputPin + InputPin>(pin: &mut P) -> Result<u32> {
    let mut worst = Duration::ZERO;
    for _ in 0..LATENCY_SAMPLES {
        pin.set_low()
            .map_err(|e| anyhow!("Failed to drive GPIO line: {e:?}"))?;
        let start = Instant::now();
        pin.set_high()
            .map_err(|e| anyhow!("Failed to release GPIO line: {e:?}"))?;
        pin.is_high()
            .map_err(|e| anyhow!("Failed to read GPIO line: {e:?}"))?;
        worst = worst.max(start.elapsed());
    }
    Ok(u32::try_from(worst.as_micros()).unwrap_or(u32::MAX).saturating_add(1))
}

fn simulated(roms: &[Rom]) -> Result<SimLine<SIM_CAPACITY>> {
    let mut line = SimLine::new();
    for rom in roms {
        if !rom.is_valid() {
            log::warn!("Simulated device {rom} has an invalid CRC");
        }
        line.attach(SimDevice::new(*rom))
            .map_err(|dev| anyhow!("At most {SIM_CAPACITY} simulated devices, {} not attached", dev.rom()))?;
    }
    Ok(line)
}

fn run<L, W>(line: L, sample_point_us: u32, command: Command, out: &mut W) -> Result<()>
where
    L: Line,
    L::Error: Debug,
    W: Write,
{
    let mut bus = OneWireMasterBuilder::default()
        .with_sample_point_us(sample_point_us)
        .build(line)
        .map_err(bus_error)?;
    match command {
        Command::Scan { family, alarm } => {
            let kind = if alarm {
                OneWireSearchKind::Alarmed
            } else {
                OneWireSearchKind::Normal
            };
            let mut search = match family {
                Some(family) => OneWireSearch::with_family(&mut bus, kind, family),
                None => OneWireSearch::new(&mut bus, kind),
            };
            let mut found = 0;
            while let Some(rom) = search.next().map_err(bus_error)? {
                writeln!(out, "{rom}")?;
                found += 1;
            }
            log::info!("Found {found} devices");
        }
        Command::Verify { rom } => {
            let mut search = OneWireSearch::new(&mut bus, OneWireSearchKind::Normal);
            if !search.verify(&rom).map_err(bus_error)? {
                bail!("{rom} is not on the bus");
            }
            writeln!(out, "{rom} present")?;
        }
        Command::ReadRom => {
            let rom = bus.read_rom().map_err(bus_error)?;
            writeln!(out, "{rom}")?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    let mut stdout = io::stdout().lock();
    match args.line {
        Some(offset) => {
            let line = open_gpio(&args.chip, offset)?;
            run(line, args.sample_point_us, args.command, &mut stdout)
        }
        None => {
            let line = simulated(&args.simulate)?;
            run(line, args.sample_point_us, args.command, &mut stdout)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    const DS18B20: &str = "28ff641e0f000034";
    const DS2401: &str = "021cb801000000a2";

    fn rom(s: &str) -> Rom {
        s.parse().unwrap()
    }

    fn output(roms: &[Rom], command: Command) -> Result<String> {
        let mut out = Vec::new();
        run(simulated(roms)?, 13, command, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parse_gpio_scan() {
        let args =
            Args::try_parse_from(["onewire-linux", "--line", "4", "scan", "--family", "0x28"])
                .unwrap();
        assert_eq!(args.chip, "/dev/gpiochip0");
        assert_eq!(args.line, Some(4));
        assert!(args.simulate.is_empty());
        assert_eq!(
            args.command,
            Command::Scan {
                family: Some(0x28),
                alarm: false
            }
        );
    }

    #[test]
    fn parse_simulated_verify() {
        let args = Args::try_parse_from([
            "onewire-linux",
            "--simulate",
            DS18B20,
            "--simulate",
            "02:1c:b8:01:00:00:00:a2",
            "--sample-point-us",
            "15",
            "verify",
            DS2401,
        ])
        .unwrap();
        assert_eq!(args.simulate, [rom(DS18B20), rom(DS2401)]);
        assert_eq!(args.sample_point_us, 15);
        assert_eq!(args.command, Command::Verify { rom: rom(DS2401) });
    }

    #[test]
    fn rejects_bad_arguments() {
        // Neither a GPIO line nor a simulated bus
        assert!(Args::try_parse_from(["onewire-linux", "scan"]).is_err());
        assert!(
            Args::try_parse_from(["onewire-linux", "--line", "4", "--simulate", DS2401, "scan"])
                .is_err()
        );
        assert!(Args::try_parse_from(["onewire-linux", "--simulate", "28ff", "scan"]).is_err());
        assert!(
            Args::try_parse_from(["onewire-linux", "--line", "4", "scan", "--family", "zz"])
                .is_err()
        );
    }

    #[test]
    fn family_codes_are_hex() {
        assert_eq!(parse_family("28"), Ok(0x28));
        assert_eq!(parse_family("0x10"), Ok(0x10));
        assert_eq!(parse_family("0XFF"), Ok(0xff));
        assert!(parse_family("100").is_err());
    }

    #[test]
    fn scan_lists_devices_in_search_order() {
        let roms = [rom(DS18B20), rom(DS2401), Rom::new(0x10, 0x42)];
        let out = output(
            &roms,
            Command::Scan {
                family: None,
                alarm: false,
            },
        )
        .unwrap();
        let mut expected = roms;
        expected.sort_by_key(|rom| u64::from(*rom).reverse_bits());
        let expected: Vec<String> = expected.iter().map(|rom| rom.to_string()).collect();
        assert_eq!(out.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn scan_by_family() {
        let roms = [rom(DS18B20), rom(DS2401), Rom::new(0x28, 0x42)];
        let out = output(
            &roms,
            Command::Scan {
                family: Some(0x28),
                alarm: false,
            },
        )
        .unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().all(|line| line.starts_with("28")));
    }

    #[test]
    fn verify_and_read_rom() {
        assert_eq!(
            output(&[rom(DS2401)], Command::Verify { rom: rom(DS2401) }).unwrap(),
            format!("{DS2401} present\n")
        );
        assert!(output(&[rom(DS2401)], Command::Verify { rom: rom(DS18B20) }).is_err());
        assert_eq!(
            output(&[rom(DS18B20)], Command::ReadRom).unwrap(),
            format!("{DS18B20}\n")
        );
        assert!(output(&[], Command::ReadRom).is_err());
    }

    #[test]
    fn release_latency_is_rounded_up() {
        use std::convert::Infallible;

        use embedded_hal::digital::ErrorType;

        struct FastPin;
        impl ErrorType for FastPin {
            type Error = Infallible;
        }
        impl OutputPin for FastPin {
            fn set_low(&mut self) -> Result<(), Infallible> {
                Ok(())
            }
            fn set_high(&mut self) -> Result<(), Infallible> {
                Ok(())
            }
        }
        impl InputPin for FastPin {
            fn is_high(&mut self) -> Result<bool, Infallible> {
                Ok(true)
            }
            fn is_low(&mut self) -> Result<bool, Infallible> {
                Ok(false)
            }
        }

        assert!(measure_release_latency(&mut FastPin).unwrap() >= 1);
    }
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use commandline::{CliArgs, CliCommands};
use easytouch_lib::command::{CommandEncoder, Target};
use easytouch_lib::interpreter::StatusReport;
use easytouch_lib::protocol::{Dialect, FeatureId, TemperatureUnit};
use easytouch_lib::serialport::EasyTouch;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod daemon;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_report(report: &StatusReport, panel: &EasyTouch) {
    let unit = match report.unit {
        TemperatureUnit::Fahrenheit => "°F",
        TemperatureUnit::Celsius => "°C",
    };
    let (hour, minute) = report.clock();
    println!("Clock: {hour:02}:{minute:02}");
    for (sensor, value) in report.temperatures() {
        println!("Temperature {sensor}: {value}{unit}");
    }
    println!(
        "Heater: pool={} spa={}",
        report.pool_heater, report.spa_heater
    );
    for (feature, state) in panel.controller().registry().iter() {
        let pending = if state.pending { " (pending)" } else { "" };
        println!(
            "Feature {feature}: {}{pending}",
            if state.on { "on" } else { "off" }
        );
    }
}

fn open_panel(args: &CliArgs, link: Option<&config::LinkConfig>) -> Result<EasyTouch> {
    let dialect = args
        .dialect
        .map(Dialect::from)
        .or(link.and_then(|link| link.dialect))
        .unwrap_or_default();
    let mut panel = EasyTouch::with_baud_rate(&args.device, args.baud_rate, dialect)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    panel.set_timeout(args.timeout)?;
    panel.set_poll_interval(args.poll_interval);
    panel
        .set_direction_line(args.direction_line.into())
        .with_context(|| "Cannot set direction line")?;
    let controller = panel.controller_mut();
    controller.set_frame_timeout(args.frame_timeout.or(link.and_then(|link| link.frame_timeout)));
    if let Some(link) = link {
        link.apply(controller)?;
    }
    Ok(panel)
}

fn switch(panel: &mut EasyTouch, target: Target, on: bool, retries: u8) -> Result<()> {
    panel
        .set_feature_with_retry(&mut (), target, on, retries)
        .with_context(|| format!("Cannot switch {target:?}"))?;
    println!("{target:?}: {}", if on { "on" } else { "off" });
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let link = args
        .config
        .as_deref()
        .map(config::LinkConfig::load)
        .transpose()?;

    match &args.command {
        CliCommands::Features => {
            for feature in FeatureId::ALL {
                println!("{:>2} {:<14} {}", feature as u8, feature.key(), feature);
            }
            return Ok(());
        }
        CliCommands::Encode { feature, state } => {
            let dialect = args
                .dialect
                .map(Dialect::from)
                .or(link.as_ref().and_then(|link| link.dialect))
                .unwrap_or_default();
            let mut encoder = CommandEncoder::new(dialect);
            if let Some(link) = &link {
                for (feature, address) in link.bindings()? {
                    encoder.bind(feature, address);
                }
            }
            let frame = encoder
                .encode((*feature).into(), state.is_on())
                .with_context(|| format!("Cannot encode command for {feature}"))?;
            println!("{frame:02X?}");
            return Ok(());
        }
        _ => {}
    }

    let mut panel = open_panel(&args, link.as_ref())?;

    match args.command {
        CliCommands::Status { wait } => {
            match panel
                .wait_for_status(&mut (), wait)
                .with_context(|| "Cannot read status")?
            {
                Some(report) => print_report(&report, &panel),
                None => bail!("No status broadcast received within {wait:?}"),
            }
        }
        CliCommands::Monitor => loop {
            if let Some(report) = panel.poll(&mut ()).with_context(|| "Cannot read status")? {
                println!("--- Status at {} ---", chrono::Local::now().to_rfc3339());
                print_report(&report, &panel);
            }
            std::thread::sleep(panel.poll_interval());
        },
        CliCommands::Set { feature, state } => {
            switch(&mut panel, feature.into(), state.is_on(), args.retries)?
        }
        CliCommands::SetAddress { address, state } => switch(
            &mut panel,
            Target::Address(address),
            state.is_on(),
            args.retries,
        )?,
        CliCommands::Daemon { output, interval } => {
            daemon::run(panel, output, interval, args.retries)?
        }
        CliCommands::Features | CliCommands::Encode { .. } => {}
    }

    Ok(())
}

use arrayvec::ArrayVec;
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use ecu_bridge::bridge::TelemetryState;
use ecu_bridge::codec::{self, Record};
use ecu_bridge::schema::{MessageId, FRAME_LEN};
use ecu_bridge::source::SourceKind;
use ecu_bridge::staleness::StalenessReport;
use ecu_bridge::{bus, select_source, BridgeConfig, TelemetryBridge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("ecu-bridge")
        .version("0.1.0")
        .author("Vehicle Systems Engineering Team")
        .about("🚗 ECU bus telemetry bridge - decode, monitor and simulate publish-bus frames")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("interface")
                .short("i")
                .long("interface")
                .value_name("IFACE")
                .help("Bus interface name (overrides the config file)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("no-fallback")
                .long("no-fallback")
                .help("Never fall back to the synthetic source")
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Poll the live telemetry snapshot")
                .long_about("Selects the bus or the synthetic source, starts it and prints the snapshot with per-channel staleness")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: until Ctrl+C)")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Duration must be a whole number of seconds".into()),
                        }),
                )
                .arg(
                    Arg::with_name("refresh")
                        .short("r")
                        .long("refresh")
                        .value_name("MS")
                        .help("Print interval in milliseconds (default: consumer poll rate)")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(ms) if ms > 0 => Ok(()),
                            _ => Err("Refresh must be a positive number of milliseconds".into()),
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("🔍 Decode a single frame")
                .arg(
                    Arg::with_name("id")
                        .help("Arbitration identifier, e.g. 0x6A0")
                        .required(true),
                )
                .arg(
                    Arg::with_name("data")
                        .help("Payload as hex, e.g. \"03 6B 01 C4 00 01 00 EA\"")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("probe")
                .about("🔌 Check whether the bus interface can be opened"),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config(&matches)?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("monitor", Some(sub_matches)) => handle_monitor(sub_matches, &config, format).await?,
        ("decode", Some(sub_matches)) => handle_decode(sub_matches, format)?,
        ("probe", _) => handle_probe(&config, format),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Watch live (or synthetic) telemetry", "ecu-bridge monitor".bright_cyan());
            println!("  {} Decode one frame", "ecu-bridge decode 0x6A1 03 1F 40 01 F4".bright_cyan());
            println!("  {} Check the bus interface", "ecu-bridge probe".bright_cyan());
        }
    }

    Ok(())
}

fn load_config(matches: &ArgMatches<'_>) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(interface) = matches.value_of("interface") {
        config.bus.interface = interface.to_string();
    }
    if matches.is_present("no-fallback") {
        config.fallback_enabled = false;
    }
    config.validate()?;
    Ok(config)
}

async fn handle_monitor(
    matches: &ArgMatches<'_>,
    config: &BridgeConfig,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let duration = matches
        .value_of("duration")
        .map(str::parse::<u64>)
        .transpose()?
        .map(Duration::from_secs);
    let refresh = matches
        .value_of("refresh")
        .map(str::parse::<u64>)
        .transpose()?
        .map_or_else(|| config.consumer.poll_interval(), Duration::from_millis);
    let stale_timeout = config.consumer.stale_timeout();

    let bridge = TelemetryBridge::shared();
    let mut source = select_source(config, bus::default_opener(), Arc::clone(&bridge));
    source.start()?;
    let kind = source.kind();

    let deadline = duration.map(|d| Instant::now() + d);
    let mut interval = time::interval(refresh);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                break;
            }
            _ = interval.tick() => {
                let snapshot = bridge.snapshot();
                let report = snapshot.staleness(bridge.now_us(), stale_timeout);
                print_snapshot(&snapshot, &report, kind, format)?;
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
        }
    }

    source.stop();
    Ok(())
}

fn handle_decode(matches: &ArgMatches<'_>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let raw_id = parse_id(matches.value_of("id").unwrap_or_default())?;
    let id = MessageId::from_raw(raw_id)
        .ok_or_else(|| format!("0x{raw_id:03X} is not a publish-bus identifier"))?;
    let hex: Vec<&str> = matches.values_of("data").map(|values| values.collect()).unwrap_or_default();
    let payload = parse_payload(&hex.join(""))?;
    let record = codec::decode(id, &payload)?;

    match format {
        "json" => println!("{}", serde_json::to_string(&record)?),
        "compact" => println!("{}", format_record(&record)),
        _ => {
            println!("{} {}", "🔍".bright_blue(), id.to_string().bright_blue().bold());
            println!("{}", format_record(&record));
        }
    }
    Ok(())
}

fn handle_probe(config: &BridgeConfig, format: &str) {
    let result = bus::default_opener().probe(&config.bus);
    match format {
        "json" => println!(
            "{}",
            serde_json::json!({
                "interface": config.bus.interface,
                "available": result.is_ok(),
                "error": result.as_ref().err().map(ToString::to_string),
            })
        ),
        _ => match result {
            Ok(()) => println!("{} {} {}", "✅".green(), config.bus.interface.bright_white(), "available".bright_green()),
            Err(e) => println!("{} {} {}", "❌".red(), config.bus.interface.bright_white(), e.to_string().bright_red()),
        },
    }
}

fn parse_id(text: &str) -> Result<u32, std::num::ParseIntError> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
}

fn parse_payload(hex: &str) -> Result<ArrayVec<u8, FRAME_LEN>, String> {
    let digits: String = hex.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in \"{hex}\""));
    }
    let mut payload = ArrayVec::new();
    for pair in digits.as_bytes().chunks(2) {
        let text = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
        let byte = u8::from_str_radix(text, 16).map_err(|e| format!("bad hex byte \"{text}\": {e}"))?;
        payload
            .try_push(byte)
            .map_err(|_| format!("payload longer than {FRAME_LEN} bytes"))?;
    }
    Ok(payload)
}

fn optional(value: Option<f32>, precision: usize) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.precision$}"))
}

fn format_record(record: &Record) -> String {
    match record {
        Record::Status(r) => {
            let mut flags = Vec::new();
            if r.flags.brake {
                flags.push("BRK");
            }
            if r.flags.handbrake {
                flags.push("HB");
            }
            if r.flags.abs_active {
                flags.push("ABS");
            }
            if r.flags.stability_active {
                flags.push("VDC");
            }
            format!(
                "lock {:.1}%  dial {}%  surface {}  slip {} km/h  [{}]",
                r.lock_command_pct,
                optional(r.lock_dial_pct, 1),
                r.surface,
                optional(r.slip_delta_kph, 2),
                flags.join(" ")
            )
        }
        Record::Context(r) => format!(
            "gear {}  speed {:.2} km/h  throttle {:.1}%",
            r.gear, r.speed_kph, r.throttle_pct
        ),
        Record::WheelSpeeds(r) => format!(
            "FL {:.2}  FR {:.2}  RL {:.2}  RR {:.2} km/h",
            r.front_left_kph, r.front_right_kph, r.rear_left_kph, r.rear_right_kph
        ),
        Record::Dynamics(r) => format!(
            "steer {:+.1}°  yaw {:+.2}°/s  lat {:+.3} g  brake {:.1} bar",
            r.steering_deg, r.yaw_rate_dps, r.lateral_g, r.brake_pressure_bar
        ),
    }
}

fn print_snapshot(
    snapshot: &TelemetryState,
    report: &StalenessReport,
    kind: SourceKind,
    format: &str,
) -> Result<(), serde_json::Error> {
    match format {
        "json" => {
            let line = serde_json::json!({
                "source": kind,
                "state": snapshot,
                "stale": report,
            });
            println!("{}", serde_json::to_string(&line)?);
        }
        "compact" => {
            let stale: Vec<String> = report.stale_channels().map(|c| c.to_string()).collect();
            println!(
                "{:?} connected={} lock={:.1} slip={} speed={:.1} stale=[{}]",
                kind,
                snapshot.connected,
                snapshot.status.value.lock_command_pct,
                optional(snapshot.status.value.slip_delta_kph, 2),
                snapshot.context.value.speed_kph,
                stale.join(",")
            );
        }
        _ => {
            let link = if snapshot.connected { "connected".bright_green() } else { "disconnected".bright_red() };
            println!("{} {:?} source, {}", "📡".bright_blue(), kind, link);
            let rows = [
                (MessageId::Status, Record::Status(snapshot.status.value)),
                (MessageId::Context, Record::Context(snapshot.context.value)),
                (MessageId::WheelSpeeds, Record::WheelSpeeds(snapshot.wheels.value)),
                (MessageId::Dynamics, Record::Dynamics(snapshot.dynamics.value)),
            ];
            for (id, record) in rows {
                let marker = if report.get(id) { "STALE".bright_red() } else { "ok".bright_green() };
                println!("  {:<22} {:>5}  {}", id.to_string().bright_white(), marker, format_record(&record));
            }
        }
    }
    Ok(())
}

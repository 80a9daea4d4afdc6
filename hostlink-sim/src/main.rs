use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostlink::{
    AuthMode, CommandError, Controller, ControllerConfig, DiscardDataPlane, MacAddress,
    Peripheral, PeripheralConfig, PeripheralStats, SimulatedWifi, SoftApConfig, StationConfig,
    TransactionSnapshot, WifiInterface,
};

const STATION_MAC: MacAddress = MacAddress::new([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56]);
const AP_BSSID: MacAddress = MacAddress::new([0x3c, 0x84, 0x6a, 0x01, 0x02, 0x03]);

#[derive(Debug)]
struct Options {
    slots: Option<usize>,
    timeout_ms: Option<u64>,
    ssid: String,
    password: String,
    failures: u32,
    json: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: hostlink-sim [--slots <n>] [--timeout-ms <ms>] [--ssid <ssid>] [--password <pw>] [--fail <n>] [--json]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --slots <n>        Controller command slots [default: 4]");
            eprintln!("  --timeout-ms <ms>  Per-command timeout [default: 5000]");
            eprintln!("  --ssid <ssid>      Access point to join [default: lab]");
            eprintln!("  --password <pw>    Access point passphrase [default: hunter22]");
            eprintln!("  --fail <n>         Failed association attempts before success [default: 0]");
            eprintln!("  --json             Print the report as JSON");
            process::exit(2);
        }
    };

    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(options)) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        slots: None,
        timeout_ms: None,
        ssid: "lab".to_string(),
        password: "hunter22".to_string(),
        failures: 0,
        json: false,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--slots" => {
                i += 1;
                let raw = args.get(i).ok_or("--slots requires a value")?;
                let slots = raw.parse().map_err(|_| format!("invalid slot count: {raw}"))?;
                options.slots = Some(slots);
            }
            "--timeout-ms" => {
                i += 1;
                let raw = args.get(i).ok_or("--timeout-ms requires a value")?;
                let ms = raw.parse().map_err(|_| format!("invalid timeout: {raw}"))?;
                options.timeout_ms = Some(ms);
            }
            "--ssid" => {
                i += 1;
                options.ssid = args.get(i).ok_or("--ssid requires a value")?.clone();
            }
            "--password" => {
                i += 1;
                options.password = args.get(i).ok_or("--password requires a value")?.clone();
            }
            "--fail" => {
                i += 1;
                let raw = args.get(i).ok_or("--fail requires a value")?;
                options.failures =
                    raw.parse().map_err(|_| format!("invalid failure count: {raw}"))?;
            }
            "--json" => options.json = true,
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

/// `RUST_LOG` wins; otherwise `HOSTLINK_LOG` picks the level for the hostlink crates.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("HOSTLINK_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!("hostlink={level},hostlink_sim={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[derive(Debug, Serialize)]
struct Step {
    command: &'static str,
    ok: bool,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Report {
    steps: Vec<Step>,
    events: Vec<hostlink::Event>,
    transactions: TransactionSnapshot,
    peripheral: PeripheralStats,
}

fn step<T: Serialize>(command: &'static str, outcome: Result<T, CommandError>) -> Step {
    match outcome {
        Ok(value) => Step {
            command,
            ok: true,
            result: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        },
        Err(e) => Step {
            command,
            ok: false,
            result: serde_json::Value::String(e.to_string()),
        },
    }
}

async fn run(options: Options) -> anyhow::Result<()> {
    let mut controller_config = ControllerConfig::from_env();
    if let Some(slots) = options.slots {
        controller_config = controller_config.with_command_slots(slots);
    }
    if let Some(ms) = options.timeout_ms {
        controller_config = controller_config.with_command_timeout(Duration::from_millis(ms));
    }

    let wifi = Arc::new(
        SimulatedWifi::new(STATION_MAC)
            .with_network("lab", "hunter22", AP_BSSID, -57, 6)
            .with_connect_failures(options.failures),
    );
    let peripheral = Peripheral::with_wifi(wifi, PeripheralConfig::from_env());

    let (host, device) = tokio::io::duplex(16 * 1024);
    let peripheral = peripheral.spawn(device);
    let controller = Controller::spawn(host, controller_config, Arc::new(DiscardDataPlane));
    let mut events = controller.subscribe_events();
    controller.on_event(|event| tracing::info!(?event, "Peripheral event"));

    let softap = SoftApConfig {
        ssid: "hostlink-sim".to_string(),
        password: "simulated".to_string(),
        channel: 6,
        auth: AuthMode::Wpa2Psk,
        max_connections: 4,
        ssid_hidden: false,
    };

    let steps = vec![
        step(
            "get_mac_address",
            controller.get_mac_address(WifiInterface::Station).await,
        ),
        step("get_wifi_mode", controller.get_wifi_mode().await),
        step(
            "connect_ap",
            controller
                .connect_ap(StationConfig::new(options.ssid, options.password))
                .await,
        ),
        step("get_ap_config", controller.get_ap_config().await),
        step(
            "set_softap_config",
            controller.set_softap_config(softap).await,
        ),
        step("get_softap_config", controller.get_softap_config().await),
        step("get_wifi_mode", controller.get_wifi_mode().await),
        step("disconnect_ap", controller.disconnect_ap().await),
    ];

    let transactions = controller.snapshot();
    controller.close().await;
    let peripheral = peripheral
        .await
        .context("peripheral task failed")?;

    let mut delivered = Vec::new();
    while let Ok(event) = events.try_recv() {
        delivered.push(event);
    }

    tracing::debug!(requests = peripheral.requests, events = delivered.len(), "Script finished");
    let report = Report {
        steps,
        events: delivered,
        transactions,
        peripheral,
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &Report) {
    for step in &report.steps {
        let mark = if step.ok { "ok " } else { "ERR" };
        println!("{mark} {:<18} {}", step.command, step.result);
    }
    for event in &report.events {
        println!("event {event:?}");
    }
    println!(
        "slots {}/{} free, peripheral handled {} requests",
        report.transactions.available, report.transactions.capacity, report.peripheral.requests
    );
}

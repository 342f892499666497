//! `reflectord`: the hosting binary for the packet reflector core. Wires a
//! `ReflectorCore` together with the built-in UDP listener/sender pair and
//! the RAP/TCP administrative front-end, starts every module named in the
//! TOML config, and runs until interrupted.
//!
//! CLI surface (per the specification's §6): `reflectord --config <path>`,
//! reading (and merely logging) `RUM_PLUGIN_PATH` as a forward-compatibility
//! placeholder for the dynamic plugin loader this build does not implement.
//! Exit codes: `0` on a clean shutdown, `1` on configuration failure, `2` on
//! module initialisation failure.

mod config;

use std::net::Ipv4Addr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};

use flux::logging::{error, info, warn, Logger};
use rumcore::processors::filter::FilterProcessor;
use rumcore::{ModuleClass, Queue, ReflectorCore};

use config::ReflectorConfig;

const EXIT_CONFIG_FAILURE: i32 = 1;
const EXIT_INIT_FAILURE: i32 = 2;

fn main() {
    let matches = App::new("reflectord")
        .version("1.0")
        .author("SleepingPills")
        .about("Modular packet reflector: fans out received datagrams to subscribed clients through a configurable processor chain.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Path to the TOML configuration file")
                .required(true)
                .takes_value(true),
        )
        .get_matches();

    let config_path = matches.value_of("config").expect("--config is required");

    let reflector_config = match config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("reflectord: {}", err);
            process::exit(EXIT_CONFIG_FAILURE);
        }
    };

    let logger = flux::logging::init(&reflector_config.logging);

    let plugin_path = std::env::var("RUM_PLUGIN_PATH").unwrap_or_default();
    info!(logger, "starting reflectord";
        "config" => config_path,
        "plugin_path" => plugin_path.as_str());

    if let Err(message) = run(reflector_config, logger.clone()) {
        error!(logger, "initialisation failed"; "reason" => message);
        process::exit(EXIT_INIT_FAILURE);
    }

    info!(logger, "reflectord shut down cleanly");
}

/// Builds the core, registers every built-in module factory and configured
/// processor/route, starts the configured listeners/senders/admin
/// front-end, and blocks until a `SIGINT`/`SIGTERM` requests shutdown.
/// Returns `Err` with a human-readable reason on any fatal setup failure.
fn run(config: ReflectorConfig, logger: Logger) -> Result<(), String> {
    let core = ReflectorCore::new().map_err(|e| format!("reflector core init: {}", e))?;
    let pipeline = Arc::new(Queue::data(config.pipeline_capacity));
    let master = Arc::new(rumcore::ManagementMaster::new(core.clone(), logger.clone()));
    rumcore::register_builtins(&core, master.clone(), pipeline);

    for filter in &config.filters {
        core.processors
            .register_processor(filter.name.clone(), Arc::new(FilterProcessor::new(filter.sample.clone().into_bytes())));
    }

    for route in &config.routes {
        let (network, prefix_bits) = parse_cidr_v4(&route.destination).ok_or_else(|| format!("invalid route destination: {}", route.destination))?;
        core.routing.set_path_rule(network, prefix_bits, route.processors.clone());
    }

    let readiness_stop = Arc::new(AtomicBool::new(false));
    let readiness_handle = core.readiness.clone().spawn(readiness_stop.clone());

    start_module(&master, ModuleClass::MsgInterface, "rap-tcp", &[("bind", config.admin_bind.clone())])?;
    for listener in &config.listeners {
        start_module(&master, ModuleClass::Listener, "udp", &[("bind", listener.bind.clone())])?;
    }
    for sender in &config.senders {
        start_module(&master, ModuleClass::Sender, "udp", &[("bind", sender.bind.clone())])?;
    }

    info!(logger, "reflector running"; "admin_bind" => config.admin_bind.as_str());

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    if ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst)).is_err() {
        warn!(logger, "failed to install signal handler; shutdown must come from an external kill");
    }
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!(logger, "shutdown requested, stopping modules");
    let mut loaded = Vec::new();
    core.modules.foreach(ModuleClass::Reflector, |id| loaded.push(id.clone()));
    for id in loaded {
        let request = rap::Request {
            method: "STOP".to_owned(),
            headers: vec![
                ("Class".to_owned(), id.class.as_str().to_owned()),
                ("Name".to_owned(), id.name.clone()),
            ],
            body: Vec::new(),
        };
        master.handle(&request);
    }

    readiness_stop.store(true, Ordering::Relaxed);
    let _ = readiness_handle.join();
    Ok(())
}

/// Issues a `START` request through the management master's normal wire
/// dispatch path, rather than touching `core.modules` directly, so startup
/// exercises the exact code path an administrative client would.
fn start_module(master: &rumcore::ManagementMaster, class: ModuleClass, name: &str, params: &[(&str, String)]) -> Result<(), String> {
    let mut headers = vec![
        ("Class".to_owned(), class.as_str().to_owned()),
        ("Name".to_owned(), name.to_owned()),
    ];
    for (key, value) in params {
        headers.push((format!("Param-{}", key), value.clone()));
    }
    let request = rap::Request {
        method: "START".to_owned(),
        headers,
        body: Vec::new(),
    };
    let response = master.handle(&request);
    if response.code == 200 {
        Ok(())
    } else {
        Err(format!("failed to start {}/{} (code {})", class, name, response.code))
    }
}

fn parse_cidr_v4(value: &str) -> Option<(Ipv4Addr, u8)> {
    let mut parts = value.splitn(2, '/');
    let address: Ipv4Addr = parts.next()?.parse().ok()?;
    let bits: u8 = parts.next()?.parse().ok()?;
    Some((address, bits))
}

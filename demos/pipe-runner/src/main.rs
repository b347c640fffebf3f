mod cli;

use clap::Parser;
use log::info;
use logdest_bridge::prelude::*;
use logdest_bridge::worker::SignalHandler;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

/// Location the statically linked demo destinations answer for with `--static`.
const STATIC_LOCATION: &str = "demo";

fn loader(args: &cli::Args) -> std::io::Result<ClassLoader> {
    if args.use_static {
        let source = StaticSource::new();
        source.install(STATIC_LOCATION, stdout_destination::register);
        ClassLoader::new(source)
    } else {
        ClassLoader::dylib()
    }
}

fn main() {
    env_logger::init();
    let args = cli::Args::parse();

    let mut destination = args.destination().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });
    if args.use_static {
        destination.class_path = STATIC_LOCATION.to_string();
    }
    info!(
        "Loading {} as {}",
        destination.descriptor(),
        destination.display_name()
    );

    let loader = loader(&args).unwrap_or_else(|e| {
        eprintln!("Failed to start the bridge runtime: {e}");
        std::process::exit(1);
    });
    let config = Arc::new(ConfigStore::new());
    let messages = Arc::new(MessageStore::new());
    let host = PluginHost::new(loader, config.clone(), messages.clone())
        .with_deinit_policy(destination.deinit_policy);

    let handle = config
        .register(destination.options.clone())
        .unwrap_or_else(|e| {
            eprintln!("Failed to register options: {e}");
            std::process::exit(1);
        });
    let plugin = host
        .create(handle, &destination.descriptor())
        .unwrap_or_else(|e| {
            eprintln!("Failed to create destination: {e}");
            std::process::exit(1);
        });

    let worker = DestinationWorker::spawn_with(
        destination.display_name(),
        plugin,
        messages,
        Duration::from_millis(args.poll_ms),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to start worker: {e}");
        std::process::exit(1);
    });
    let stop = worker.stop_handle();
    SignalHandler::register_handlers(&stop);

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Failed to read stdin: {e}");
                break;
            }
        };
        let mut fields = Fields::new();
        fields.insert("MESSAGE".to_string(), line);
        fields.insert("HOST".to_string(), hostname.clone());
        fields.insert("PROGRAM".to_string(), "pipe-runner".to_string());
        if !stop.is_running() || !worker.send(fields) {
            break;
        }
    }

    let stats = worker.shutdown();
    config.release(handle);
    info!("Destination stopped: {stats:?}");
    if stats.disabled {
        eprintln!("Destination failed to initialize");
        std::process::exit(1);
    }
}

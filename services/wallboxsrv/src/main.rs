//! Compleo Wallbox Service (wallboxsrv)
//!
//! Polls Compleo wallboxes over Modbus TCP and drives their charging power.
//!
//! Controller inputs come from the `points` section of the config. With
//! `--control-stdin` they can be changed at runtime, one command per line
//! (see [`wallboxsrv::runtime::control`]), e.g. from a home automation script
//! piping its solar excess into the service.

use std::process::ExitCode;

use clap::Parser;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use errors::{WallboxError, WallboxErrorTrait, WallboxResult};
use wallboxsrv::core::bootstrap::{self, Args, ServiceArgs};
use wallboxsrv::core::config::WallboxConfig;
use wallboxsrv::error::StationError;
use wallboxsrv::runtime::{run_control, spawn_station, spawn_stdin_reader, StationTiming};
use wallboxsrv::session::StationSession;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(
                retryable = e.is_retryable(),
                "wallboxsrv failed [{}]: {}",
                e.error_code(),
                e
            );
            eprintln!("Error: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        },
    }
}

async fn run() -> WallboxResult<()> {
    let args = Args::parse();
    let service_args: ServiceArgs = args.clone().into();

    bootstrap::initialize_logging(&service_args)?;
    info!("Starting wallboxsrv v{}", env!("CARGO_PKG_VERSION"));

    let config = bootstrap::load_config(&service_args, args.simulate)?;

    // Validation mode: print the effective configuration and exit
    if service_args.validate {
        println!("{}", serde_yaml::to_string(&config)?);
        info!("Validation completed successfully");
        return Ok(());
    }

    if args.once {
        return run_once(&config, &args).await;
    }

    let token = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.stations.len());
    let mut tasks = Vec::with_capacity(config.stations.len());
    for station in &config.stations {
        let transport = bootstrap::build_transport(station, args.simulate, args.simulate_points);
        let session = StationSession::new(station, transport);
        let (handle, task) = spawn_station(session, StationTiming::from(station), token.clone());
        handles.push(handle);
        tasks.push(task);
    }
    info!("{} station task(s) running", tasks.len());

    if args.control_stdin {
        info!("Reading control commands from stdin");
        tokio::spawn(run_control(spawn_stdin_reader(), handles.clone(), token.clone()));
    }

    tokio::spawn(common::shutdown::cancel_on_shutdown(token.clone()));
    token.cancelled().await;

    let grace = config.shutdown_grace();
    let stopped = match tokio::time::timeout(grace, join_all(tasks)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    error!("Station task panicked: {}", e);
                }
            }
            Ok(())
        },
        Err(_) => {
            warn!("Station tasks did not stop within {:?}", grace);
            Err(WallboxError::shutdown(format!(
                "station tasks still running after {:?}",
                grace
            )))
        },
    };

    for handle in &handles {
        let status = handle.status();
        info!(
            "Station {} final state: available={}, failures={}",
            status.name, status.available, status.consecutive_failures
        );
    }

    info!("wallboxsrv stopped");
    stopped
}

/// One cycle per station, snapshots printed to stdout as JSON
///
/// Every station is tried; the first failure decides the exit code.
async fn run_once(config: &WallboxConfig, args: &Args) -> WallboxResult<()> {
    let mut snapshots = Vec::with_capacity(config.stations.len());
    let mut first_error = None;

    for station in &config.stations {
        let transport = bootstrap::build_transport(station, args.simulate, args.simulate_points);
        let mut session = StationSession::new(station, transport);

        if station.probe_unit_ids {
            if let Err(e) = session.probe_unit_id().await {
                warn!("Station {}: unit id probe failed: {}", station.name, e);
            }
        }

        let deadline = station.cycle_timeout();
        let result = match tokio::time::timeout(deadline, session.run_cycle()).await {
            Ok(result) => result,
            Err(_) => Err(StationError::timeout(format!(
                "update cycle exceeded {:?}",
                deadline
            ))),
        };
        session.close().await;

        match result {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => {
                error!("Station {} update failed: {}", station.name, e);
                first_error.get_or_insert(e);
            },
        }
    }

    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

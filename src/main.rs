use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use reqflow::{
    config::Config,
    core::error::FlowResult,
    logging::Logger,
    orchestration::{Director, DirectorOptions, RunOutcome},
    transport::TransportConfig,
};

#[derive(Parser)]
#[command(name = "reqflow")]
#[command(about = "Run a tree of HTTP requests and function invocations", long_about = None)]
struct Args {
    /// Request tree configuration file
    #[arg(short, long)]
    conf: String,

    /// Log per-request timings
    #[arg(short, long)]
    debug: bool,

    /// Pretty-print the collected data
    #[arg(short, long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load_from_yaml(&args.conf) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    let debug = args.debug || config.debug;
    let log_task = Logger::new(config.log.as_ref(), debug).init();

    let code = match run(&config, debug, args.pretty).await {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Aborted) => ExitCode::from(130),
        Err(e) => {
            log::error!("{e}");
            eprintln!("{e}");
            ExitCode::from(1)
        }
    };

    // the writer flushes whenever its queue drains
    if let Some(task) = log_task {
        let _ = tokio::time::timeout(Duration::from_millis(200), task).await;
    }
    code
}

async fn run(config: &Config, debug: bool, pretty: bool) -> FlowResult<RunOutcome> {
    // Loading the request tree
    log::info!("Building request tree...");
    let tree = config.build_tree()?;

    let transport = TransportConfig::from_settings(&config.transport)?;
    let director = Arc::new(Director::new(
        tree,
        DirectorOptions::new(transport).with_debug(debug),
    ));

    let abort_on_signal = director.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, waiting for in-flight requests");
            abort_on_signal.abort();
        }
    });

    log::info!("Starting run...");
    let finished = director.run().await?;

    let data = finished.context.get_data();
    let output = if pretty {
        serde_json::to_string_pretty(&data)
    } else {
        serde_json::to_string(&data)
    }
    .map_err(|e| reqflow::internal_error!("failed to serialize run data: {}", e))?;
    println!("{output}");

    Ok(finished.outcome)
}

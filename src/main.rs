use clap::Parser;
use coc_harvest::cli::Args;
use coc_harvest::config::{Config, Credentials};
use coc_harvest::error::AppError;
use coc_harvest::logging::setup_logging;
use coc_harvest::orchestrator::{RunOptions, run_scrape};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    if args.init_config {
        let path = args.config.clone().unwrap_or_else(Config::get_config_path);
        Config::default().save_to_path(&path).await?;
        println!("Wrote default configuration to {path}");
        return Ok(());
    }

    let config = Config::load(args.config.as_deref()).await?;
    let (log_file_path, _guard) = setup_logging(&args, &config).await?;
    info!(
        "{} {} starting, logging to {log_file_path}",
        coc_harvest::NAME,
        coc_harvest::VERSION
    );

    let credentials = Credentials::resolve(&args.credential_inputs())?;
    let options = RunOptions {
        snapshot_date: args.snapshot_date,
    };

    let report = match run_scrape(&config, &credentials, &options).await {
        Ok(report) => report,
        Err(e) => {
            error!("Run aborted: {e}");
            return Err(e);
        }
    };

    report.print_summary();
    if let Some(path) = &args.report_json {
        report.write_json(path).await?;
    }

    let tolerance = config.scheduler.failure_tolerance;
    if report.exceeds_tolerance(tolerance) {
        error!(
            "{} targets failed, tolerance is {tolerance}",
            report.failed()
        );
        return Err(AppError::run_failed(report.failed(), tolerance));
    }

    Ok(())
}

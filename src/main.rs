use std::process::ExitCode;

use paperless_scribe::config::{Settings, APP_NAME, APP_VERSION};
use paperless_scribe::pipeline::daemon::DaemonHandle;
use paperless_scribe::pipeline::PipelineError;

fn usage() -> ExitCode {
    eprintln!("usage: {APP_NAME} <ocr|classify>");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let Some(stage) = std::env::args().nth(1) else {
        return usage();
    };

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{APP_NAME}: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    paperless_scribe::init_tracing(&settings);
    tracing::info!(stage = %stage, "{} starting v{}", APP_NAME, APP_VERSION);

    let started: Result<DaemonHandle, PipelineError> = match stage.as_str() {
        "ocr" => paperless_scribe::build_ocr_scheduler(&settings).and_then(|s| s.spawn()),
        "classify" => paperless_scribe::build_classify_scheduler(&settings).and_then(|s| s.spawn()),
        _ => return usage(),
    };
    let handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start daemon");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = wait_for_signal() {
        tracing::error!(error = %e, "Signal handling failed; shutting down");
    }
    tracing::info!("Shutdown requested; finishing current batch");
    handle.shutdown();
    drop(handle);
    tracing::info!("Stopped");
    ExitCode::SUCCESS
}

/// Block until SIGINT or (on Unix) SIGTERM.
fn wait_for_signal() -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    runtime.block_on(async {
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = term.recv() => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    })
}

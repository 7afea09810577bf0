mod app;
mod auto_window;
mod classify;
mod codec;
mod coerce;
mod config;
mod consistency;
mod dataset;
mod edit_dialog;
mod edit_prompt;
#[cfg(test)]
mod fixtures;
mod launch;
mod registry;
mod renderer;
mod storage;
mod transaction;
mod windowing;

use std::process::ExitCode;
use std::sync::Arc;

use codec::{Codec, DicomCodec};
use launch::{LaunchRequest, USAGE};
use registry::DatasetRegistry;

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let path = match launch::parse_launch_request_from_args(&cli_args) {
        Ok(LaunchRequest::Open(path)) => path,
        Ok(LaunchRequest::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{err}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = config::AppConfig::load();
    let codec: Arc<dyn Codec> = Arc::new(DicomCodec);
    let report = match DatasetRegistry::load(&path, Arc::clone(&codec), config.load_workers) {
        Ok(report) => report,
        Err(err) => {
            log::error!("{err}");
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "Opened {} record(s) from {}",
        report.registry.len(),
        report.source.display()
    );

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_title(app::APP_TITLE)
            .with_resizable(true),
        ..Default::default()
    };

    let result = eframe::run_native(
        app::APP_TITLE,
        native_options,
        Box::new(move |_cc| Ok(Box::new(app::TagScopeApp::new(config, codec, report)))),
    );
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Viewer failed: {err}");
            ExitCode::FAILURE
        }
    }
}

use clap::Parser;
use std::process;

use undistort_recorder::cli::{self, Args, Command};
use undistort_recorder::config::{FileConfig, RecorderConfig};
use undistort_recorder::devices::SystemDevices;
use undistort_recorder::error::FAILURE_EXIT_CODE;
use undistort_recorder::hotkeys::{setup_ctrlc_handler, KeyboardStop};
use undistort_recorder::CaptureLoop;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let file_config = match FileConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(FAILURE_EXIT_CODE);
        }
    };
    let mut config = RecorderConfig::resolve(args.preset.map(Into::into), &file_config);
    args.apply_to(&mut config);

    match args.command {
        Some(Command::Calibration { path }) => {
            cli::show_calibration(Some(path.unwrap_or(config.calibration_path)));
            return;
        }
        Some(Command::Pipeline) => {
            cli::show_pipeline(&config);
            return;
        }
        Some(Command::ListCameras) => {
            cli::list_cameras();
            return;
        }
        Some(Command::Config { action }) => {
            cli::handle_config_action(action, &config, args.config.as_deref());
            return;
        }
        None => {}
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        process::exit(FAILURE_EXIT_CODE);
    }

    let code = record(config);
    process::exit(code);
}

/// Run one recording and map the outcome to an exit code.
fn record(config: RecorderConfig) -> i32 {
    match std::env::current_dir() {
        Ok(dir) => println!("Current working directory: {}", dir.display()),
        Err(e) => log::warn!("Could not determine working directory: {}", e),
    }
    println!("Calibration file: {}", config.calibration_path.display());

    if let Err(e) = setup_ctrlc_handler() {
        eprintln!("Warning: Could not set up Ctrl+C handler: {}", e);
    }

    let mut capture = CaptureLoop::new(config);
    let mut stop = KeyboardStop::new();

    match capture.run(&mut SystemDevices, &mut stop) {
        Ok(summary) => {
            println!(
                "Video saved as '{}' ({} frames, {})",
                capture.config().output.path.display(),
                summary.frames_written,
                summary.resolution
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

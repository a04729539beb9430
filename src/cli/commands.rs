//! Subcommand handlers for calibration, pipeline, list-cameras and config actions.

use std::path::{Path, PathBuf};

use super::args::ConfigAction;
use crate::calibration::{self, DEFAULT_CALIBRATION_FILE};
use crate::camera::CaptureCommand;
use crate::config::{default_path as get_config_path, RecorderConfig, DEFAULT_CONFIG_TEMPLATE};
use crate::devices;

/// Load a calibration file and print its contents.
pub fn show_calibration(path: Option<PathBuf>) {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_FILE));
    match calibration::load(&path) {
        Ok(data) => {
            println!("Calibration: {}", path.display());
            println!("{}", data);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print the capture command the recorder would run.
pub fn show_pipeline(config: &RecorderConfig) {
    let command = CaptureCommand::for_camera(&config.camera);
    println!("{}", command);
}

/// List V4L2 capture devices and print them to stdout.
pub fn list_cameras() {
    match devices::list_system_video_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No cameras found.");
            println!();
            println!("CSI sensors are reached through gst-launch-1.0 and may not show up here.");
        }
        Ok(devices) => {
            println!("Available cameras:");
            for device in devices {
                println!("  {}", device);
            }
            println!();
            println!("Use --backend v4l2 --device <path> to select a camera.");
        }
        Err(e) => {
            eprintln!("Error: could not list /dev: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, config: &RecorderConfig, config_path: Option<&Path>) {
    let config_path = config_path.map(PathBuf::from).unwrap_or_else(get_config_path);
    match action {
        ConfigAction::Show => {
            println!("Current configuration:");
            println!("{}", config);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            if config_path.exists() {
                eprintln!("Config file already exists: {}", config_path.display());
                eprintln!("Use 'undistort-recorder config show' to view current settings.");
                std::process::exit(1);
            }

            if let Some(parent) = config_path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Error creating config directory: {}", e);
                    std::process::exit(1);
                }
            }

            if let Err(e) = std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE) {
                eprintln!("Error writing config file: {}", e);
                std::process::exit(1);
            }

            println!("Created config file: {}", config_path.display());
        }
    }
}

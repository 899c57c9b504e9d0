use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use meg2bids::tools::{DicomConverter, EegLocationFixer};
use meg2bids::Settings;
use serde::Serialize;

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    platform: String,
    arch: String,
    config: Option<String>,
    meg_system: Option<String>,
    eeg_fixer: Option<String>,
    eeg_fixer_found: Option<bool>,
    dcm2niix: Option<String>,
    dcm2niix_found: Option<bool>,
}

pub fn execute(args: InfoArgs) -> i32 {
    let settings = match &args.config {
        Some(path) => match Settings::load(path) {
            Ok(s) => Some(s),
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        },
        None => None,
    };

    let mut info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        config: args.config.clone(),
        meg_system: None,
        eeg_fixer: None,
        eeg_fixer_found: None,
        dcm2niix: None,
        dcm2niix_found: None,
    };

    if let Some(settings) = &settings {
        info.meg_system = Some(settings.meg_system.to_string());
        if let Some(cmd) = &settings.check_eeg_cmd {
            let fixer = EegLocationFixer::new(cmd);
            info.eeg_fixer = Some(cmd.display().to_string());
            info.eeg_fixer_found = Some(fixer.is_available());
        }
        let converter = DicomConverter::new(settings.dcm2niix_cmd.clone());
        info.dcm2niix = Some(settings.dcm2niix_cmd.clone());
        info.dcm2niix_found = Some(converter.is_available());
    }

    if args.json {
        match output::to_json(&info, false) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json, None) {
                    eprintln!("Error: {}", e);
                    return exit_codes::EXECUTION_ERROR;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    } else {
        println!("meg2bids CLI v{}", info.cli_version);
        println!("Platform: {} ({})", info.platform, info.arch);
        if let Some(system) = &info.meg_system {
            println!();
            println!("MEG system: {}", system);
            match (&info.eeg_fixer, info.eeg_fixer_found) {
                (Some(cmd), Some(found)) => {
                    println!(
                        "EEG location fixer: {} ({})",
                        cmd,
                        if found { "found" } else { "not found" }
                    );
                }
                _ => println!("EEG location fixer: not configured"),
            }
            if let (Some(cmd), Some(found)) = (&info.dcm2niix, info.dcm2niix_found) {
                println!(
                    "DICOM converter: {} ({})",
                    cmd,
                    if found { "found" } else { "not found" }
                );
            }
        }
    }

    exit_codes::SUCCESS
}

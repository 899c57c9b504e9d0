use crate::cli::ConvertArgs;
use crate::exit_codes;
use crate::output;
use meg2bids::{run_conversion, BidsTreeWriter, ConvertOptions, MatrixReader, Settings};

pub fn execute(args: ConvertArgs) -> i32 {
    let settings = match Settings::load(&args.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if !args.quiet {
        eprintln!("Converting data using settings from {}...", args.config);
        eprintln!("  MEG system: {}", settings.meg_system);
        eprintln!("  Output root: {}", settings.bids_raw_root.display());
    }

    let reader = MatrixReader::new();
    let writer = BidsTreeWriter::new(&settings.bids_raw_root);
    let options = ConvertOptions {
        keep_existing_folders: args.keep_existing_folders,
        keep_source_data: args.keep_source_data,
    };

    let report = match run_conversion(&settings, &reader, &writer, options) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return match e {
                meg2bids::ConvertError::Config(_)
                | meg2bids::ConvertError::SubjectData { .. } => exit_codes::INPUT_ERROR,
                _ => exit_codes::EXECUTION_ERROR,
            };
        }
    };

    if let Some(ref path) = args.output {
        match output::to_json(&report, false) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json, Some(path)) {
                    eprintln!("Error: {}", e);
                    return exit_codes::EXECUTION_ERROR;
                }
            }
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    }

    if !args.quiet {
        eprintln!(
            "Conversion finished: {} converted, {} skipped, {} failed",
            report.converted.len(),
            report.skipped.len(),
            report.failed.len()
        );
        for failure in &report.failed {
            eprintln!("  {} failed: {}", failure.subject, failure.error);
        }
    }

    if report.failed.is_empty() {
        exit_codes::SUCCESS
    } else if !report.converted.is_empty() {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::EXECUTION_ERROR
    }
}

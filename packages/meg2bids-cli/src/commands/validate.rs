use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use meg2bids::{check_subject_info, load_subject_info, EventDictionary, Settings};
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    config: String,
    config_ok: bool,
    n_subjects: Option<usize>,
    n_events: Option<usize>,
    error: Option<String>,
}

fn validate(config_path: &str) -> Result<(usize, usize), String> {
    let settings = Settings::load(config_path).map_err(|e| e.to_string())?;
    let events = EventDictionary::load(&settings.event_info_path).map_err(|e| e.to_string())?;
    let subjects = load_subject_info(&settings.subject_info_path).map_err(|e| e.to_string())?;
    check_subject_info(&subjects).map_err(|e| e.to_string())?;
    Ok((subjects.len(), events.len()))
}

pub fn execute(args: ValidateArgs) -> i32 {
    let outcome = validate(&args.config);

    let result = match &outcome {
        Ok((n_subjects, n_events)) => ValidateOutput {
            config: args.config.clone(),
            config_ok: true,
            n_subjects: Some(*n_subjects),
            n_events: Some(*n_events),
            error: None,
        },
        Err(e) => ValidateOutput {
            config: args.config.clone(),
            config_ok: false,
            n_subjects: None,
            n_events: None,
            error: Some(e.clone()),
        },
    };

    if args.json {
        match output::to_json(&result, false) {
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
        match &outcome {
            Ok((n_subjects, n_events)) => println!(
                "Configuration '{}' is valid ({} subjects, {} event codes)",
                args.config, n_subjects, n_events
            ),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    if outcome.is_ok() {
        exit_codes::SUCCESS
    } else {
        exit_codes::INPUT_ERROR
    }
}

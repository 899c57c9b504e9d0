use crate::cli::DecodeArgs;
use crate::exit_codes;
use crate::output;
use meg2bids::{
    adjust_event_times, events_from_trigger_channels, EventDictionary, LatencyCorrection,
    MatrixReader, RawReader, Settings, TriggerEvent,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct DecodeOutput {
    file: String,
    sfreq: f64,
    adjusted: bool,
    n_events: usize,
    value_counts: BTreeMap<i32, usize>,
    events: Vec<NamedEvent>,
}

#[derive(Serialize)]
struct NamedEvent {
    sample: i64,
    previous: i32,
    code: i32,
    trial_type: Option<String>,
}

fn name_events(events: &[TriggerEvent], dictionary: &EventDictionary) -> Vec<NamedEvent> {
    events
        .iter()
        .map(|e| NamedEvent {
            sample: e.sample,
            previous: e.previous,
            code: e.code,
            trial_type: dictionary.name(e.code).map(|n| n.to_string()),
        })
        .collect()
}

pub fn execute(args: DecodeArgs) -> i32 {
    let settings = match Settings::load(&args.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    let dictionary = match EventDictionary::load(&settings.event_info_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let raw = match MatrixReader::new().read_raw(std::path::Path::new(&args.file)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut events = match events_from_trigger_channels(&raw, &settings.event_channels) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.adjust {
        let correction = match LatencyCorrection::from_settings(&settings, &dictionary) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        };
        adjust_event_times(&mut events, &correction, raw.sfreq);
    }

    let result = DecodeOutput {
        file: args.file.clone(),
        sfreq: raw.sfreq,
        adjusted: args.adjust,
        n_events: events.len(),
        value_counts: meg2bids::events::event_value_counts(&events),
        events: name_events(&events, &dictionary),
    };

    match output::to_json(&result, args.compact) {
        Ok(json) => {
            if let Err(e) = output::write_output(&json, args.output.as_deref()) {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing events: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

//! Event dictionary and event-time correction.
//!
//! The event dictionary maps symbolic event names to the integer codes
//! carried on the trigger lines. Names encode the stimulus modality by
//! prefix (`spoken_*` auditory, `written_*` visual by default), which is how
//! the latency-correction code sets are derived.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Settings;
use crate::error::{ConvertError, Result};

/// One decoded trigger event.
///
/// `sample` is the absolute onset sample index (the recording's first-sample
/// offset included), `previous` the trigger level right before the
/// transition, `code` the new level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub sample: i64,
    pub previous: i32,
    pub code: i32,
}

/// Immutable mapping from symbolic event name to integer trigger code,
/// loaded once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDictionary(BTreeMap<String, i32>);

impl EventDictionary {
    /// Load and validate the dictionary from a JSON object file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvertError::Config(format!(
                "cannot read event info file {}: {}",
                path.display(),
                e
            ))
        })?;
        let dict: EventDictionary = serde_json::from_str(&content).map_err(|e| {
            ConvertError::Config(format!(
                "malformed event info file {}: {}",
                path.display(),
                e
            ))
        })?;
        dict.validate()?;
        Ok(dict)
    }

    pub fn from_map(map: BTreeMap<String, i32>) -> Result<Self> {
        let dict = EventDictionary(map);
        dict.validate()?;
        Ok(dict)
    }

    /// Codes must be unique positive integers.
    fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<i32, &str> = BTreeMap::new();
        for (name, &code) in &self.0 {
            if code <= 0 {
                return Err(ConvertError::Config(format!(
                    "event {} has non-positive code {}",
                    name, code
                )));
            }
            if let Some(other) = seen.insert(code, name) {
                return Err(ConvertError::Config(format!(
                    "events {} and {} share code {}",
                    other, name, code
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn code(&self, name: &str) -> Option<i32> {
        self.0.get(name).copied()
    }

    /// Name registered for a code, if any.
    pub fn name(&self, code: i32) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, &c)| c == code)
            .map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i32)> {
        self.0.iter()
    }

    /// Codes for an explicit list of event names; an unknown name is a
    /// configuration error.
    pub fn codes_for_names(&self, names: &[String]) -> Result<Vec<i32>> {
        names
            .iter()
            .map(|n| {
                self.code(n).ok_or_else(|| {
                    ConvertError::Config(format!(
                        "event name {} not found in the event dictionary",
                        n
                    ))
                })
            })
            .collect()
    }

    /// Codes of every event whose name starts with `prefix`.
    pub fn codes_with_prefix(&self, prefix: &str) -> Vec<i32> {
        self.0
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, &code)| code)
            .collect()
    }
}

/// Modality-specific onset correction derived from the settings and the
/// event dictionary.
#[derive(Debug, Clone)]
pub struct LatencyCorrection {
    pub audio_latency_sec: f64,
    pub visual_latency_sec: f64,
    pub auditory_codes: Vec<i32>,
    pub visual_codes: Vec<i32>,
}

impl LatencyCorrection {
    /// Build the correction from explicit name lists in the settings, or by
    /// prefix when a list is absent.
    pub fn from_settings(settings: &Settings, events: &EventDictionary) -> Result<Self> {
        let auditory_codes = match &settings.auditory_event_names {
            Some(names) => events.codes_for_names(names)?,
            None => events.codes_with_prefix(&settings.auditory_event_prefix),
        };
        let visual_codes = match &settings.visual_event_names {
            Some(names) => events.codes_for_names(names)?,
            None => events.codes_with_prefix(&settings.visual_event_prefix),
        };
        if let Some(code) = auditory_codes.iter().find(|c| visual_codes.contains(*c)) {
            return Err(ConvertError::Config(format!(
                "event code {} is listed as both auditory and visual",
                code
            )));
        }
        Ok(LatencyCorrection {
            audio_latency_sec: settings.audio_latency_sec,
            visual_latency_sec: settings.visual_latency_sec,
            auditory_codes,
            visual_codes,
        })
    }
}

/// Shift onsets of auditory/visual events by the fixed delivery latencies.
///
/// Events whose code belongs to neither set are untouched. An empty code set
/// skips that modality with a notice; it is not an error. Onsets are not
/// clamped against the recording length. The correction must be applied at
/// most once per event array; the conversion driver guarantees this.
pub fn adjust_event_times(events: &mut [TriggerEvent], correction: &LatencyCorrection, sfreq: f64) {
    if correction.auditory_codes.is_empty() {
        log::info!("no auditory event codes configured, skipping auditory onset correction");
    } else {
        let shift = (correction.audio_latency_sec * sfreq).round() as i64;
        for event in events
            .iter_mut()
            .filter(|e| correction.auditory_codes.contains(&e.code))
        {
            event.sample += shift;
        }
    }

    if correction.visual_codes.is_empty() {
        log::info!("no visual event codes configured, skipping visual onset correction");
    } else {
        let shift = (correction.visual_latency_sec * sfreq).round() as i64;
        for event in events
            .iter_mut()
            .filter(|e| correction.visual_codes.contains(&e.code))
        {
            event.sample += shift;
        }
    }
}

/// Count occurrences per event code, for the per-recording summary log.
pub fn event_value_counts(events: &[TriggerEvent]) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.code).or_insert(0) += 1;
    }
    counts
}

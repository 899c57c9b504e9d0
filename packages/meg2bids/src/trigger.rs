//! Trigger channel resolution and event decoding.
//!
//! MEG trigger hardware emits multi-bit event codes across dedicated binary
//! signal lines (`STI001`..`STI016`, nominally 0 V or 5 V). The acquisition
//! software also records a combined channel (`STI101`) carrying the decimal
//! sum of all lines, but button-press responses are added cumulatively on top
//! of stimulus codes on that line and can mask them. Decoding the dedicated
//! single-purpose bit lines and recombining them deterministically recovers
//! unambiguous codes; see the module functions for the exact rules.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::events::TriggerEvent;
use crate::recording::RawRecording;

/// Combined trigger channel carrying the decimal sum of all bit lines.
pub const COMBINED_CHANNEL: &str = "STI101";

/// Pulses shorter than this are ignored as noise.
pub const MIN_PULSE_DURATION_SEC: f64 = 0.002;

/// Number of hardware bit lines (`STI001`..`STI016`).
pub const N_BIT_LINES: usize = 16;

/// Name of the `i`-th (1-based) hardware bit line.
pub fn bit_line_name(index: usize) -> String {
    format!("STI{:03}", index)
}

/// Configured trigger channel description.
///
/// Either a flat list of bit-line names, or a two-role mapping separating
/// stimulus lines from response lines. With the mapping form the stimulus
/// lines are summed into one combined line while each response line is
/// decoded on its own, so a held-down response button cannot mask stimulus
/// codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerChannelSet {
    Lines(Vec<String>),
    StimResp { stim: Vec<String>, resp: Vec<String> },
}

impl TriggerChannelSet {
    /// Default bit-line set `STI001`..`STI008`.
    pub fn default_lines() -> Self {
        TriggerChannelSet::Lines((1..=8).map(bit_line_name).collect())
    }

    /// Structural validation, independent of any recording.
    ///
    /// `STI101` combines all bit lines so it must appear alone, and the
    /// stimulus/response sets must be disjoint.
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerChannelSet::Lines(lines) => {
                if lines.is_empty() {
                    return Err(ConvertError::Config(
                        "event_channels must not be empty".to_string(),
                    ));
                }
                if lines.iter().any(|ch| ch == COMBINED_CHANNEL) && lines.len() > 1 {
                    return Err(ConvertError::Config(format!(
                        "{} combines all trigger lines so it must be the only \
                         channel in the event_channels list",
                        COMBINED_CHANNEL
                    )));
                }
            }
            TriggerChannelSet::StimResp { stim, resp } => {
                if stim.is_empty() || resp.is_empty() {
                    return Err(ConvertError::Config(
                        "event_channels stim and resp lists must not be empty".to_string(),
                    ));
                }
                if stim
                    .iter()
                    .chain(resp.iter())
                    .any(|ch| ch == COMBINED_CHANNEL)
                {
                    return Err(ConvertError::Config(format!(
                        "{} combines all trigger lines so it cannot appear in the \
                         stim or resp lists",
                        COMBINED_CHANNEL
                    )));
                }
                if let Some(dup) = stim.iter().find(|ch| resp.contains(*ch)) {
                    return Err(ConvertError::Config(format!(
                        "channel {} cannot be used in both the stim and resp lists",
                        dup
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolved, recording-specific channel assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedChannels {
    /// Decode the already-decimal combined channel directly.
    Combined,
    /// Decode these bit lines, sorted ascending by name.
    Lines(Vec<String>),
    /// Decode summed stimulus lines plus independent response lines, each
    /// list sorted ascending by name.
    StimResp { stim: Vec<String>, resp: Vec<String> },
}

/// Structured warning emitted during channel resolution, so callers can
/// assert on the fallback instead of scraping log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolveWarning {
    /// Configured channels were absent from the recording; decoding fell
    /// back to the combined channel.
    MissingChannels { role: String, missing: Vec<String> },
}

/// Outcome of [`resolve_event_channels`].
#[derive(Debug, Clone)]
pub struct Resolution {
    pub channels: ResolvedChannels,
    pub warnings: Vec<ResolveWarning>,
}

fn missing_from(configured: &[String], available: &[String]) -> Vec<String> {
    configured
        .iter()
        .filter(|ch| !available.iter().any(|a| a == *ch))
        .cloned()
        .collect()
}

fn combined_fallback(available: &[String], role: &str, missing: Vec<String>) -> Result<Resolution> {
    if !available.iter().any(|ch| ch == COMBINED_CHANNEL) {
        return Err(ConvertError::DecodeAmbiguity(format!(
            "configured {} channels {:?} not found in the recording and no {} \
             channel present to fall back to",
            role, missing, COMBINED_CHANNEL
        )));
    }
    log::warn!(
        "{} channel(s) {:?} not found in the recording; falling back to {}",
        role,
        missing,
        COMBINED_CHANNEL
    );
    Ok(Resolution {
        channels: ResolvedChannels::Combined,
        warnings: vec![ResolveWarning::MissingChannels {
            role: role.to_string(),
            missing,
        }],
    })
}

/// Normalize and validate the configured trigger channels against the
/// channel names actually present in a recording.
///
/// Structural errors (overlapping roles, misused combined channel) are fatal
/// before any decoding. Configured channels absent from the recording trigger
/// a warn-and-substitute fallback to [`COMBINED_CHANNEL`], provided that
/// channel exists; otherwise resolution fails.
pub fn resolve_event_channels(
    configured: &TriggerChannelSet,
    available: &[String],
) -> Result<Resolution> {
    configured.validate()?;

    match configured {
        TriggerChannelSet::Lines(lines) => {
            if lines.len() == 1 && lines[0] == COMBINED_CHANNEL {
                if !available.iter().any(|ch| ch == COMBINED_CHANNEL) {
                    return Err(ConvertError::DecodeAmbiguity(format!(
                        "{} channel not found in the recording",
                        COMBINED_CHANNEL
                    )));
                }
                return Ok(Resolution {
                    channels: ResolvedChannels::Combined,
                    warnings: vec![],
                });
            }
            let missing = missing_from(lines, available);
            if !missing.is_empty() {
                return combined_fallback(available, "stimulus", missing);
            }
            let mut sorted = lines.clone();
            sorted.sort();
            Ok(Resolution {
                channels: ResolvedChannels::Lines(sorted),
                warnings: vec![],
            })
        }
        TriggerChannelSet::StimResp { stim, resp } => {
            let missing_stim = missing_from(stim, available);
            if !missing_stim.is_empty() {
                return combined_fallback(available, "stimulus", missing_stim);
            }
            let missing_resp = missing_from(resp, available);
            if !missing_resp.is_empty() {
                return combined_fallback(available, "response", missing_resp);
            }
            let mut stim = stim.clone();
            let mut resp = resp.clone();
            stim.sort();
            resp.sort();
            Ok(Resolution {
                channels: ResolvedChannels::StimResp { stim, resp },
                warnings: vec![],
            })
        }
    }
}

/// Decimal weight of a bit line.
///
/// Channels named after the hardware lines (`STI001`..`STI016`) always carry
/// their hardware weight (`STI001` → 1, ..., `STI016` → 32768) regardless of
/// which subset is configured. Other names fall back to `2^position` in the
/// sorted channel list.
fn bit_weight(name: &str, sorted_position: usize) -> f64 {
    if let Some(digits) = name.strip_prefix("STI") {
        if digits.len() == 3 {
            if let Ok(n) = digits.parse::<usize>() {
                if (1..=N_BIT_LINES).contains(&n) {
                    return (1u64 << (n - 1)) as f64;
                }
            }
        }
    }
    (1u64 << sorted_position) as f64
}

/// Replace every high sample on each line with that line's decimal weight.
///
/// The hardware emits the same high amplitude on every active bit line, so
/// any nonzero reading means "bit set".
fn lines_to_decimal(data: &mut Array2<f64>, channels: &[String]) {
    for (i, ch) in channels.iter().enumerate() {
        let weight = bit_weight(ch, i);
        for v in data.row_mut(i) {
            if *v > 0.0 {
                *v = weight;
            }
        }
    }
}

/// Detect level transitions on one decimal-coded line.
///
/// A new event is emitted whenever the value changes and the new nonzero
/// level persists for at least `min_samples`; shorter runs are absorbed as
/// noise. A direct nonzero-to-nonzero transition is a valid new event. The
/// implicit level before the first sample is 0.
fn detect_level_transitions(
    line: ArrayView1<'_, f64>,
    min_samples: usize,
    first_samp: i64,
) -> Vec<TriggerEvent> {
    // Run-length encode the line.
    let mut runs: Vec<(usize, i32, usize)> = Vec::new();
    for (idx, &v) in line.iter().enumerate() {
        let level = v.round() as i32;
        match runs.last_mut() {
            Some((_, last_level, len)) if *last_level == level => *len += 1,
            _ => runs.push((idx, level, 1)),
        }
    }

    // Absorb sub-threshold runs and merge the neighbours they separated.
    let mut kept: Vec<(usize, i32)> = Vec::new();
    for (start, level, len) in runs {
        if len < min_samples.max(1) {
            continue;
        }
        match kept.last() {
            Some(&(_, last_level)) if last_level == level => {}
            _ => kept.push((start, level)),
        }
    }

    let mut events = Vec::new();
    let mut previous = 0i32;
    for (start, level) in kept {
        if level != previous && level != 0 {
            events.push(TriggerEvent {
                sample: start as i64 + first_samp,
                previous,
                code: level,
            });
        }
        previous = level;
    }
    events
}

fn sum_lines(data: &Array2<f64>) -> Vec<f64> {
    let n_samples = data.ncols();
    let mut combined = vec![0.0; n_samples];
    for row in data.rows() {
        for (acc, &v) in combined.iter_mut().zip(row.iter()) {
            *acc += v;
        }
    }
    combined
}

fn min_pulse_samples(sfreq: f64) -> usize {
    (MIN_PULSE_DURATION_SEC * sfreq).ceil() as usize
}

/// Decode discrete trigger events from a recording's trigger channels.
///
/// Resolves `configured` against the recording's channel names, converts the
/// bit lines to decimal weights, sums stimulus lines into one combined line
/// (response lines stay separate), and runs transition detection on every
/// resulting line. Events from all lines are returned on one list, ascending
/// by absolute sample index (the recording's first-sample offset included).
pub fn events_from_trigger_channels(
    raw: &RawRecording,
    configured: &TriggerChannelSet,
) -> Result<Vec<TriggerEvent>> {
    let resolution = resolve_event_channels(configured, &raw.channel_names)?;
    let events = decode_resolved(raw, &resolution.channels)?;
    Ok(events)
}

/// Decode with an already-resolved channel assignment.
pub fn decode_resolved(
    raw: &RawRecording,
    resolved: &ResolvedChannels,
) -> Result<Vec<TriggerEvent>> {
    let min_samples = min_pulse_samples(raw.sfreq);

    let mut events = match resolved {
        ResolvedChannels::Combined => {
            let data = raw.channel_data(std::slice::from_ref(&COMBINED_CHANNEL.to_string()))?;
            detect_level_transitions(data.row(0), min_samples, raw.first_samp)
        }
        ResolvedChannels::Lines(lines) => {
            let mut data = raw.channel_data(lines)?;
            lines_to_decimal(&mut data, lines);
            let combined = sum_lines(&data);
            detect_level_transitions(
                ArrayView1::from(combined.as_slice()),
                min_samples,
                raw.first_samp,
            )
        }
        ResolvedChannels::StimResp { stim, resp } => {
            let mut stim_data = raw.channel_data(stim)?;
            lines_to_decimal(&mut stim_data, stim);
            let combined = sum_lines(&stim_data);
            let mut events = detect_level_transitions(
                ArrayView1::from(combined.as_slice()),
                min_samples,
                raw.first_samp,
            );

            let mut resp_data = raw.channel_data(resp)?;
            lines_to_decimal(&mut resp_data, resp);
            for row in resp_data.rows() {
                events.extend(detect_level_transitions(row, min_samples, raw.first_samp));
            }
            events
        }
    };

    events.sort_by_key(|e| e.sample);
    Ok(events)
}

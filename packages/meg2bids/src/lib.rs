//! # meg2bids — raw MEG/MRI acquisitions to a BIDS-style dataset
//!
//! `meg2bids` is a configuration-driven batch pipeline that converts raw MEG
//! recordings (plus optional structural MRI) into a standardized dataset
//! layout, annotating each recording with trigger events decoded from the
//! binary hardware signal channels.
//!
//! The pipeline is strictly sequential: subjects are processed one after the
//! other, recordings within a subject one after the other, and every external
//! tool invocation is a blocking child process whose exit status is checked
//! before the next step runs.
//!
//! ## Pipeline overview
//!
//! ```text
//! config.json + event_info.json + subject_info.json
//!   │
//!   ├─ Settings::load()            config load + fail-fast validation
//!   ├─ check_subject_info()        per-subject metadata/path validation
//!   └─ run_conversion()            per subject:
//!        ├─ split_empty_room()     hold out the baseline recording
//!        ├─ EEG location repair    external fixer on a staged copy (gated)
//!        ├─ trigger decoding       STI bit lines → decimal event codes
//!        ├─ adjust_event_times()   fixed audio/visual latency shifts (gated)
//!        ├─ DatasetWriter          delegated BIDS-style write
//!        └─ dcm2niix + write_anat  structural MRI conversion (gated)
//! ```
//!
//! Reading proprietary raw formats and emitting the full BIDS vocabulary are
//! delegated behind the [`RawReader`] and [`DatasetWriter`] traits; the crate
//! ships a staged-matrix reader and a filesystem tree writer.

pub mod bids;
pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod recording;
pub mod subjects;
pub mod tools;
pub mod trigger;

pub use bids::{BidsTreeWriter, DatasetWriter, WriteRequest};
pub use config::{MegSystem, Settings};
pub use convert::{convert_subject, run_conversion, ConversionReport, ConvertOptions};
pub use error::{ConvertError, Result};
pub use events::{adjust_event_times, EventDictionary, LatencyCorrection, TriggerEvent};
pub use recording::{MatrixReader, RawReader, RawRecording};
pub use subjects::{
    check_subject_info, load_subject_info, split_empty_room, RawFileDescriptor, SubjectInfo,
    SubjectRecord, EMPTYROOM_RUN,
};
pub use trigger::{
    events_from_trigger_channels, resolve_event_channels, ResolveWarning, ResolvedChannels,
    Resolution, TriggerChannelSet, COMBINED_CHANNEL, MIN_PULSE_DURATION_SEC,
};

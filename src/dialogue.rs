//! Conversation states, preset tables and the strict value parsers used by the bordering dialogue.

use std::ops::RangeInclusive;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::InputError;

/// Where a user is in the bordering conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingAspect,
    AwaitingCustomAspect,
    AwaitingCanvas,
    AwaitingCustomCanvas,
}

impl ConversationState {
    pub fn is_idle(self) -> bool {
        matches!(self, ConversationState::Idle)
    }
}

pub const ASPECT_RATIO_RANGE: RangeInclusive<f64> = 0.2..=5.0;
pub const CANVAS_SIZE_RANGE: RangeInclusive<f64> = 0.0..=3.0;

/// Aspect ratios offered on the keyboard
pub const ASPECT_PRESETS: [&str; 6] = ["1/1", "4/5", "16/9", "9/16", "9/19", "2/1"];

/// Canvas sizes offered on the keyboard
pub const CANVAS_PRESETS: [&str; 6] = ["1", "1.02", "1.05", "1.1", "1.2", "1.3"];

/// Text (and button payload suffix) selecting the free-form entry
pub const CUSTOM_CHOICE: &str = "custom";

const ASPECT_PREFIX: &str = "aspect:";
const CANVAS_PREFIX: &str = "canvas:";

lazy_static! {
    static ref RATIO_REGEX: Regex =
        Regex::new(r"^\s*([0-9]+)\s*/\s*([0-9]+)\s*$").expect("Ratio pattern should be valid");
}

/// Parse `a/b` into `a / b`, both terms whole numbers and non-zero
///
/// The result must fall inside [`ASPECT_RATIO_RANGE`].
pub fn parse_aspect_ratio(text: &str) -> Result<f64, InputError> {
    let caps = RATIO_REGEX
        .captures(text)
        .ok_or_else(|| InputError::MalformedRatio(text.to_string()))?;

    let width: u64 = caps[1]
        .parse()
        .map_err(|_| InputError::MalformedRatio(text.to_string()))?;
    let height: u64 = caps[2]
        .parse()
        .map_err(|_| InputError::MalformedRatio(text.to_string()))?;

    if width == 0 || height == 0 {
        return Err(InputError::ZeroTerm(text.to_string()));
    }

    let ratio = width as f64 / height as f64;
    check_range(ratio, &ASPECT_RATIO_RANGE)
}

/// Parse a canvas size multiplier inside [`CANVAS_SIZE_RANGE`]
pub fn parse_canvas_size(text: &str) -> Result<f64, InputError> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| InputError::MalformedNumber(text.to_string()))?;
    if !value.is_finite() {
        return Err(InputError::MalformedNumber(text.to_string()));
    }
    check_range(value, &CANVAS_SIZE_RANGE)
}

fn check_range(value: f64, range: &RangeInclusive<f64>) -> Result<f64, InputError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(InputError::OutOfRange {
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

pub fn is_custom_choice(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(CUSTOM_CHOICE)
}

/// Return the preset label if `text` is exactly one of `presets`
pub fn match_preset(text: &str, presets: &[&'static str]) -> Option<&'static str> {
    let trimmed = text.trim();
    presets.iter().copied().find(|preset| *preset == trimmed)
}

/// A keyboard choice, as carried in inline button payloads
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Choice {
    Aspect(String),
    CustomAspect,
    Canvas(String),
    CustomCanvas,
}

impl Choice {
    pub fn to_data(&self) -> String {
        match self {
            Choice::Aspect(value) => format!("{ASPECT_PREFIX}{value}"),
            Choice::CustomAspect => format!("{ASPECT_PREFIX}{CUSTOM_CHOICE}"),
            Choice::Canvas(value) => format!("{CANVAS_PREFIX}{value}"),
            Choice::CustomCanvas => format!("{CANVAS_PREFIX}{CUSTOM_CHOICE}"),
        }
    }

    pub fn from_data(data: &str) -> Option<Self> {
        if let Some(value) = data.strip_prefix(ASPECT_PREFIX) {
            return Some(if value == CUSTOM_CHOICE {
                Choice::CustomAspect
            } else {
                Choice::Aspect(value.to_string())
            });
        }
        if let Some(value) = data.strip_prefix(CANVAS_PREFIX) {
            return Some(if value == CUSTOM_CHOICE {
                Choice::CustomCanvas
            } else {
                Choice::Canvas(value.to_string())
            });
        }
        None
    }
}

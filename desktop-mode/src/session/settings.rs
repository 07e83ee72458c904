// Setting model for the display service configuration
// A Snapshot is the full set of values at one instant; edits are typed per field

use super::error::SettingError;
use serde::{Deserialize, Serialize};

/// Largest accepted scaling factor, in percent
pub const MAX_SCALING_PERCENT: u32 = 1000;

/// Named settings as they are stored in the config store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    AutoResolution,
    ResolutionWidth,
    ResolutionHeight,
    ScalingPercent,
    EmulateTouch,
    RelativeInput,
    MirrorInternal,
    Audio,
    RemoteCursor,
    Clipboard,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::AutoResolution,
        SettingKey::ResolutionWidth,
        SettingKey::ResolutionHeight,
        SettingKey::ScalingPercent,
        SettingKey::EmulateTouch,
        SettingKey::RelativeInput,
        SettingKey::MirrorInternal,
        SettingKey::Audio,
        SettingKey::RemoteCursor,
        SettingKey::Clipboard,
    ];

    /// Storage name of the setting
    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::AutoResolution => "pc_mode_auto_resolution",
            SettingKey::ResolutionWidth => "pc_mode_res_width",
            SettingKey::ResolutionHeight => "pc_mode_res_height",
            SettingKey::ScalingPercent => "pc_mode_scaling",
            SettingKey::EmulateTouch => "pc_mode_emulate_touch",
            SettingKey::RelativeInput => "pc_mode_relative_input",
            SettingKey::MirrorInternal => "pc_mode_mirror_internal",
            SettingKey::Audio => "pc_mode_audio",
            SettingKey::RemoteCursor => "pc_mode_remote_cursor",
            SettingKey::Clipboard => "pc_mode_clipboard",
        }
    }

    pub fn default_value(&self) -> SettingValue {
        match self {
            SettingKey::AutoResolution => SettingValue::Bool(true),
            SettingKey::ResolutionWidth => SettingValue::Int(1280),
            SettingKey::ResolutionHeight => SettingValue::Int(720),
            SettingKey::ScalingPercent => SettingValue::Int(100),
            SettingKey::EmulateTouch => SettingValue::Bool(false),
            SettingKey::RelativeInput => SettingValue::Bool(false),
            SettingKey::MirrorInternal => SettingValue::Bool(false),
            SettingKey::Audio => SettingValue::Bool(true),
            SettingKey::RemoteCursor => SettingValue::Bool(true),
            SettingKey::Clipboard => SettingValue::Bool(true),
        }
    }

    /// Largest value an integer setting accepts
    pub fn max_int(&self) -> i64 {
        match self {
            SettingKey::ScalingPercent => i64::from(MAX_SCALING_PERCENT),
            _ => i64::from(u32::MAX),
        }
    }

    /// Whether a change to this setting can only take effect in a new service process
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            SettingKey::AutoResolution | SettingKey::ResolutionWidth | SettingKey::ResolutionHeight
        )
    }

    /// Short name used on the command line (`width`, `audio`, ...)
    pub fn short_name(&self) -> &'static str {
        match self {
            SettingKey::AutoResolution => "auto-resolution",
            SettingKey::ResolutionWidth => "width",
            SettingKey::ResolutionHeight => "height",
            SettingKey::ScalingPercent => "scaling",
            SettingKey::EmulateTouch => "emulate-touch",
            SettingKey::RelativeInput => "relative-input",
            SettingKey::MirrorInternal => "mirror-internal",
            SettingKey::Audio => "audio",
            SettingKey::RemoteCursor => "remote-cursor",
            SettingKey::Clipboard => "clipboard",
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SettingKey {
    type Err = SettingError;

    /// Accepts either the storage name or the short name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.name() == s || key.short_name() == s)
            .ok_or_else(|| SettingError::UnknownKey(s.to_string()))
    }
}

/// Typed value held by a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Bool(_) => None,
        }
    }

    fn same_type(&self, other: &SettingValue) -> bool {
        matches!(
            (self, other),
            (SettingValue::Bool(_), SettingValue::Bool(_))
                | (SettingValue::Int(_), SettingValue::Int(_))
        )
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Explicit output resolution, used when auto-resize is off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How far a pending snapshot has drifted from the one the service runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    None,
    HotApplicable,
    RequiresRestart,
}

/// A single user edit to one setting (the resolution pair moves as one)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingEdit {
    AutoResolution(bool),
    Resolution(Resolution),
    ScalingPercent(u32),
    EmulateTouch(bool),
    RelativeInput(bool),
    MirrorInternal(bool),
    Audio(bool),
    RemoteCursor(bool),
    Clipboard(bool),
}

impl SettingEdit {
    /// Build an edit from a key and a raw value, e.g. `width=1920`.
    ///
    /// Width and height are single-axis edits; `current` supplies the other axis.
    pub fn parse(key: SettingKey, raw: &str, current: &Snapshot) -> Result<Self, SettingError> {
        let parse_bool = |raw: &str| -> Result<bool, SettingError> {
            match raw.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(SettingError::InvalidValue {
                    key,
                    value: raw.to_string(),
                }),
            }
        };
        let parse_int = |raw: &str| -> Result<u32, SettingError> {
            raw.parse::<u32>().map_err(|_| SettingError::InvalidValue {
                key,
                value: raw.to_string(),
            })
        };

        let edit = match key {
            SettingKey::AutoResolution => SettingEdit::AutoResolution(parse_bool(raw)?),
            SettingKey::ResolutionWidth => SettingEdit::Resolution(Resolution {
                width: parse_int(raw)?,
                height: current.resolution.height,
            }),
            SettingKey::ResolutionHeight => SettingEdit::Resolution(Resolution {
                width: current.resolution.width,
                height: parse_int(raw)?,
            }),
            SettingKey::ScalingPercent => SettingEdit::ScalingPercent(parse_int(raw)?),
            SettingKey::EmulateTouch => SettingEdit::EmulateTouch(parse_bool(raw)?),
            SettingKey::RelativeInput => SettingEdit::RelativeInput(parse_bool(raw)?),
            SettingKey::MirrorInternal => SettingEdit::MirrorInternal(parse_bool(raw)?),
            SettingKey::Audio => SettingEdit::Audio(parse_bool(raw)?),
            SettingKey::RemoteCursor => SettingEdit::RemoteCursor(parse_bool(raw)?),
            SettingKey::Clipboard => SettingEdit::Clipboard(parse_bool(raw)?),
        };
        Ok(edit)
    }

    pub fn validate(&self) -> Result<(), SettingError> {
        match *self {
            SettingEdit::Resolution(res) if res.width == 0 || res.height == 0 => {
                Err(SettingError::OutOfRange {
                    key: SettingKey::ResolutionWidth,
                    value: res.to_string(),
                })
            }
            SettingEdit::ScalingPercent(percent)
                if percent == 0 || percent > MAX_SCALING_PERCENT =>
            {
                Err(SettingError::OutOfRange {
                    key: SettingKey::ScalingPercent,
                    value: percent.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Complete set of setting values at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub auto_resolution: bool,
    pub resolution: Resolution,
    pub scaling_percent: u32,
    pub emulate_touch: bool,
    pub relative_input: bool,
    pub mirror_internal: bool,
    pub audio: bool,
    pub remote_cursor: bool,
    pub clipboard: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            auto_resolution: true,
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            scaling_percent: 100,
            emulate_touch: false,
            relative_input: false,
            mirror_internal: false,
            audio: true,
            remote_cursor: true,
            clipboard: true,
        }
    }
}

impl Snapshot {
    /// Build a snapshot from a value lookup; missing or mistyped values fall back to defaults
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(SettingKey, SettingValue) -> SettingValue,
    {
        let mut value = |key: SettingKey| {
            let default = key.default_value();
            let found = lookup(key, default);
            if found.same_type(&default) {
                found
            } else {
                tracing::warn!(
                    setting = %key,
                    value = %found,
                    "stored setting has wrong type, using default"
                );
                default
            }
        };
        let boolean = |v: SettingValue| v.as_bool().unwrap_or_default();
        let positive = |key: SettingKey, v: SettingValue| match v.as_int() {
            Some(i) if i > 0 && i <= key.max_int() => i as u32,
            _ => {
                tracing::warn!(
                    setting = %key,
                    value = %v,
                    "stored setting out of range, using default"
                );
                key.default_value().as_int().unwrap_or_default() as u32
            }
        };

        Self {
            auto_resolution: boolean(value(SettingKey::AutoResolution)),
            resolution: Resolution {
                width: positive(
                    SettingKey::ResolutionWidth,
                    value(SettingKey::ResolutionWidth),
                ),
                height: positive(
                    SettingKey::ResolutionHeight,
                    value(SettingKey::ResolutionHeight),
                ),
            },
            scaling_percent: positive(
                SettingKey::ScalingPercent,
                value(SettingKey::ScalingPercent),
            ),
            emulate_touch: boolean(value(SettingKey::EmulateTouch)),
            relative_input: boolean(value(SettingKey::RelativeInput)),
            mirror_internal: boolean(value(SettingKey::MirrorInternal)),
            audio: boolean(value(SettingKey::Audio)),
            remote_cursor: boolean(value(SettingKey::RemoteCursor)),
            clipboard: boolean(value(SettingKey::Clipboard)),
        }
    }

    /// Current value of a single setting
    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::AutoResolution => SettingValue::Bool(self.auto_resolution),
            SettingKey::ResolutionWidth => SettingValue::Int(self.resolution.width as i64),
            SettingKey::ResolutionHeight => SettingValue::Int(self.resolution.height as i64),
            SettingKey::ScalingPercent => SettingValue::Int(self.scaling_percent as i64),
            SettingKey::EmulateTouch => SettingValue::Bool(self.emulate_touch),
            SettingKey::RelativeInput => SettingValue::Bool(self.relative_input),
            SettingKey::MirrorInternal => SettingValue::Bool(self.mirror_internal),
            SettingKey::Audio => SettingValue::Bool(self.audio),
            SettingKey::RemoteCursor => SettingValue::Bool(self.remote_cursor),
            SettingKey::Clipboard => SettingValue::Bool(self.clipboard),
        }
    }

    /// All values as (key, value) pairs in storage order
    pub fn entries(&self) -> Vec<(SettingKey, SettingValue)> {
        SettingKey::ALL
            .into_iter()
            .map(|key| (key, self.get(key)))
            .collect()
    }

    /// Return a copy with the edit applied
    pub fn with_edit(&self, edit: SettingEdit) -> Snapshot {
        let mut next = *self;
        match edit {
            SettingEdit::AutoResolution(v) => next.auto_resolution = v,
            SettingEdit::Resolution(v) => next.resolution = v,
            SettingEdit::ScalingPercent(v) => next.scaling_percent = v,
            SettingEdit::EmulateTouch(v) => next.emulate_touch = v,
            SettingEdit::RelativeInput(v) => next.relative_input = v,
            SettingEdit::MirrorInternal(v) => next.mirror_internal = v,
            SettingEdit::Audio(v) => next.audio = v,
            SettingEdit::RemoteCursor(v) => next.remote_cursor = v,
            SettingEdit::Clipboard(v) => next.clipboard = v,
        }
        next
    }

    /// Keys whose values differ between the two snapshots
    pub fn changed_keys(&self, other: &Snapshot) -> Vec<SettingKey> {
        SettingKey::ALL
            .into_iter()
            .filter(|key| self.get(*key) != other.get(*key))
            .collect()
    }

    /// Classify `pending` against `self` (the snapshot the service was launched with)
    pub fn classify_change(&self, pending: &Snapshot) -> ChangeClass {
        let changed = self.changed_keys(pending);
        if changed.is_empty() {
            ChangeClass::None
        } else if changed.iter().any(SettingKey::requires_restart) {
            ChangeClass::RequiresRestart
        } else {
            ChangeClass::HotApplicable
        }
    }

    /// Display density handed to the service
    pub fn dpi(&self) -> u32 {
        u32::try_from(160 * u64::from(self.scaling_percent) / 100).unwrap_or(u32::MAX)
    }
}

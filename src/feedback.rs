use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Feedback reasons — the fixed exit-interview options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeedbackReason {
    InboxOverwhelmed,
    TopicsNotRelevant,
    NoTime,
    TooFrequent,
    ContentQuality,
    Other,
}

impl FeedbackReason {
    pub fn all() -> &'static [FeedbackReason] {
        &[
            FeedbackReason::InboxOverwhelmed,
            FeedbackReason::TopicsNotRelevant,
            FeedbackReason::NoTime,
            FeedbackReason::TooFrequent,
            FeedbackReason::ContentQuality,
            FeedbackReason::Other,
        ]
    }

    /// Stable code used in form values and analytics payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InboxOverwhelmed => "inbox-overwhelmed",
            Self::TopicsNotRelevant => "topics-not-relevant",
            Self::NoTime => "no-time",
            Self::TooFrequent => "too-frequent",
            Self::ContentQuality => "content-quality",
            Self::Other => "other",
        }
    }

    /// Human-readable label shown on the exit interview.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InboxOverwhelmed => "My inbox is overwhelmed",
            Self::TopicsNotRelevant => "Topics aren't relevant anymore",
            Self::NoTime => "Not enough time to read",
            Self::TooFrequent => "Even monthly is too frequent",
            Self::ContentQuality => "Content quality changed",
            Self::Other => "Other reason",
        }
    }
}

impl FromStr for FeedbackReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackReason::all()
            .iter()
            .copied()
            .find(|r| r.code() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown feedback reason: {}", s))
    }
}

impl fmt::Display for FeedbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for FeedbackReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for FeedbackReason {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FeedbackReason::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Feedback set — toggle semantics with change records for reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Selected,
    Deselected,
}

impl ToggleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::Deselected => "deselected",
        }
    }
}

/// What a single toggle did, plus the full set after it. This is the shape
/// the reporting layer wants for its change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackChange {
    pub reason: FeedbackReason,
    pub action: ToggleAction,
    pub selected: Vec<FeedbackReason>,
}

/// Selected exit-interview reasons. Duplicates are impossible and toggling
/// is its own inverse: a reason ends up selected iff it was toggled an odd
/// number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackSet {
    selected: BTreeSet<FeedbackReason>,
}

impl FeedbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, reason: FeedbackReason) -> FeedbackChange {
        let action = if self.selected.remove(&reason) {
            ToggleAction::Deselected
        } else {
            self.selected.insert(reason);
            ToggleAction::Selected
        };
        FeedbackChange {
            reason,
            action,
            selected: self.reasons(),
        }
    }

    pub fn contains(&self, reason: FeedbackReason) -> bool {
        self.selected.contains(&reason)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn reasons(&self) -> Vec<FeedbackReason> {
        self.selected.iter().copied().collect()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.selected.iter().map(|r| r.code()).collect()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }
}

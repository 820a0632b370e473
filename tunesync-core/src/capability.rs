//! Remote-control capabilities a source may advertise.

use serde::{Deserialize, Serialize};

/// A single transport control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Next,
    Previous,
    PlayPause,
    Stop,
    VolumeUp,
    VolumeDown,
    Mute,
}

impl Capability {
    pub const ALL: [Self; 7] = [
        Self::Next,
        Self::Previous,
        Self::PlayPause,
        Self::Stop,
        Self::VolumeUp,
        Self::VolumeDown,
        Self::Mute,
    ];

    const fn bit(self) -> u32 {
        match self {
            Self::Next => 1 << 0,
            Self::Previous => 1 << 1,
            Self::PlayPause => 1 << 2,
            Self::Stop => 1 << 3,
            Self::VolumeUp => 1 << 4,
            Self::VolumeDown => 1 << 5,
            Self::Mute => 1 << 6,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
            Self::PlayPause => "play_pause",
            Self::Stop => "stop",
            Self::VolumeUp => "volume_up",
            Self::VolumeDown => "volume_down",
            Self::Mute => "mute",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of [`Capability`] values a source supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

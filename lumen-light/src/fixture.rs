//! Fixtures and profiles
//!
//! A profile is the ordered list of fixtures rigged for a venue. Channel
//! counts come from the fixture type and start channels are packed from 1
//! in profile order.

use crate::error::LightError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

/// Highest addressable DMX channel
pub const MAX_CHANNEL: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixtureType {
    Dimmer,
    Rgb,
    Strobe,
    Laser,
    Panel,
    Bar,
    LargeArray,
    Pinspot,
}

impl FixtureType {
    /// DMX footprint of this fixture type
    pub const fn channel_count(self) -> usize {
        match self {
            Self::Dimmer => 1,
            Self::Rgb => 6,
            Self::Strobe => 2,
            Self::Laser => 10,
            Self::Panel => 7,
            Self::Bar => 4,
            Self::LargeArray => 39,
            Self::Pinspot => 6,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dimmer => "dimmer",
            Self::Rgb => "rgb",
            Self::Strobe => "strobe",
            Self::Laser => "laser",
            Self::Panel => "panel",
            Self::Bar => "bar",
            Self::LargeArray => "largeArray",
            Self::Pinspot => "pinspot",
        }
    }
}

impl fmt::Display for FixtureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A patched fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub name: String,
    pub fixture_type: FixtureType,
    /// 1-based first channel
    pub start_channel: usize,
    pub channel_count: usize,
}

impl Fixture {
    /// 1-based channel range covered by this fixture
    pub fn channels(&self) -> Range<usize> {
        self.start_channel..self.start_channel + self.channel_count
    }
}

/// Immutable fixture list for one rig
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    /// The rig lacks fixtures most scenes expect, so scene fallbacks apply
    pub fixture_constrained: bool,
    fixtures: Vec<Fixture>,
}

impl Profile {
    /// Patch fixtures sequentially from channel 1
    pub fn new(
        name: impl Into<String>,
        fixture_constrained: bool,
        lights: impl IntoIterator<Item = (String, FixtureType)>,
    ) -> Result<Self, LightError> {
        let name = name.into();
        let mut fixtures = Vec::new();
        let mut seen = HashSet::new();
        let mut next_channel = 1;

        for (light_name, fixture_type) in lights {
            if !seen.insert(light_name.clone()) {
                return Err(LightError::ProfileInvalid(format!(
                    "duplicate fixture name '{}'",
                    light_name
                )));
            }
            let channel_count = fixture_type.channel_count();
            let last = next_channel + channel_count - 1;
            if last > MAX_CHANNEL {
                return Err(LightError::ProfileInvalid(format!(
                    "fixture '{}' ends at channel {} (max {})",
                    light_name, last, MAX_CHANNEL
                )));
            }
            fixtures.push(Fixture {
                name: light_name,
                fixture_type,
                start_channel: next_channel,
                channel_count,
            });
            next_channel += channel_count;
        }

        tracing::debug!(profile = %name, fixtures = fixtures.len(), channels = next_channel - 1, "profile patched");

        Ok(Self {
            name,
            fixture_constrained,
            fixtures,
        })
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn fixture(&self, name: &str) -> Option<&Fixture> {
        self.fixtures.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fixture(name).is_some()
    }

    pub fn fixture_names(&self) -> impl Iterator<Item = &str> {
        self.fixtures.iter().map(|f| f.name.as_str())
    }

    /// Channels used by the whole profile
    pub fn total_channels(&self) -> usize {
        self.fixtures.iter().map(|f| f.channel_count).sum()
    }
}

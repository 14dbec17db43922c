//! Source identity shared by the store, the scheduler and the HTTP surface.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A remote system of record the relay keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Github,
    Calendar,
    Readwise,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Github, Source::Calendar, Source::Readwise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Github => "github",
            Source::Calendar => "calendar",
            Source::Readwise => "readwise",
        }
    }

    /// Consumer-side collection the source's records land in.
    pub fn collection(&self) -> &'static str {
        match self {
            Source::Github => "GitHub",
            Source::Calendar => "Calendar",
            Source::Readwise => "Readwise",
        }
    }

    /// Table holding this source's snapshots.
    pub fn snapshot_table(&self) -> &'static str {
        match self {
            Source::Github => "snapshots_github",
            Source::Calendar => "snapshots_calendar",
            Source::Readwise => "snapshots_readwise",
        }
    }

    /// Table holding this source's auxiliary metadata (watermarks).
    pub fn meta_table(&self) -> &'static str {
        match self {
            Source::Github => "meta_github",
            Source::Calendar => "meta_calendar",
            Source::Readwise => "meta_readwise",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Source::Github),
            "calendar" => Ok(Source::Calendar),
            "readwise" => Ok(Source::Readwise),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trips_through_str() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>(), Ok(source));
        }
        assert!("gitlab".parse::<Source>().is_err());
        assert!("GitHub".parse::<Source>().is_err());
    }
}

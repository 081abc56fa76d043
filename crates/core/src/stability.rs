//! Rolling health score over a project's most recent finished builds.

use serde::{Deserialize, Serialize};

use crate::domain::BuildStatus;

/// Number of terminal builds the score is computed over.
pub const STABILITY_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ok_builds")]
pub enum Stability {
    /// Fewer than [`STABILITY_WINDOW`] terminal builds exist.
    NotEnoughData,
    /// How many of the last [`STABILITY_WINDOW`] terminal builds were `OK`.
    Score(u8),
}

impl Stability {
    /// Compute the score from statuses ordered newest-first.
    ///
    /// Builds that are still queued or running are dropped before the window
    /// is taken, so they never push a finished build out of it.
    pub fn from_statuses<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a BuildStatus>,
    {
        let window: Vec<&BuildStatus> = statuses
            .into_iter()
            .filter(|status| status.is_terminal())
            .take(STABILITY_WINDOW)
            .collect();

        if window.len() < STABILITY_WINDOW {
            return Self::NotEnoughData;
        }

        let ok = window
            .iter()
            .filter(|status| ***status == BuildStatus::Ok)
            .count();
        Self::Score(ok as u8)
    }

    /// Integer form, with `-1` meaning not enough data.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::NotEnoughData => -1,
            Self::Score(n) => i32::from(*n),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::NotEnoughData => "not enough data",
            Self::Score(0) => "abandon the project",
            Self::Score(1) => "start fixing asap",
            Self::Score(2) => "could be worse",
            Self::Score(3) => "not bad",
            Self::Score(4) => "looking good",
            Self::Score(_) => "great",
        }
    }
}

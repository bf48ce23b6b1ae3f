//! Low-value content suppression.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterThresholds {
    pub max_likes: i64,
    pub max_followers: i64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            max_likes: 50,
            max_followers: 200,
        }
    }
}

impl FilterThresholds {
    /// A video is suppressed only when both its likes and its creator's
    /// followers are at or below the thresholds.
    pub fn suppresses(&self, likes: i64, followers: i64) -> bool {
        likes <= self.max_likes && followers <= self.max_followers
    }

    pub fn reason(&self, likes: i64, followers: i64) -> String {
        format!(
            "filtered: likes {likes} <= {} and followers {followers} <= {}",
            self.max_likes, self.max_followers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_is_inclusive() {
        let f = FilterThresholds::default();
        assert!(f.suppresses(50, 200));
        assert!(f.suppresses(0, 0));
        assert!(!f.suppresses(51, 200));
        assert!(!f.suppresses(50, 201));
        assert!(!f.suppresses(10_000, 10));
    }
}

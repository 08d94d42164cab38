//! Points, levels, streaks, and the achievement catalog.

use serde::{Deserialize, Serialize};

/// Point totals at which a user advances to the next level.
///
/// Level 1 covers 0..=49 points, level 2 starts at 50, and so on; level 5
/// (500 points) is terminal.
pub const LEVEL_THRESHOLDS: [i64; 4] = [50, 150, 300, 500];

/// Compute the level band for a point total. Boundary values belong to the
/// higher band: 50 points is level 2, 500 points is level 5.
pub fn level_for_points(points: i64) -> i64 {
    let mut level = 1;
    for threshold in LEVEL_THRESHOLDS {
        if points >= threshold {
            level += 1;
        }
    }
    level
}

/// Points still needed to reach the next level, or 0 at the top level.
pub fn points_to_next_level(points: i64) -> i64 {
    for threshold in LEVEL_THRESHOLDS {
        if points < threshold {
            return threshold - points;
        }
    }
    0
}

/// Whole days elapsed between a session start and `now`, both unix seconds.
/// A session started later than `now` counts as zero days.
pub fn streak_days(started_at: i64, now: i64) -> i64 {
    if now <= started_at {
        return 0;
    }
    (now - started_at) / 86_400
}

/// Title of the achievement unlocked by reaching a level, if that level has
/// one. Levels 1 and 4 have no level achievement of their own.
pub fn level_title(level: i64) -> Option<&'static str> {
    match level {
        2 => Some("Rising"),
        3 => Some("Steady"),
        5 => Some("Summit"),
        _ => None,
    }
}

/// Progress snapshot an achievement is judged against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub total_points: i64,
    pub completions: i64,
    pub checkins: i64,
    pub best_streak_days: i64,
}

/// One entry in the fixed achievement catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub code: String,
    pub title: String,
    pub description: String,
    pub unlocked: bool,
}

struct CatalogEntry {
    code: &'static str,
    title: &'static str,
    description: &'static str,
    unlocked: fn(&ProgressSnapshot) -> bool,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        code: "first_step",
        title: "First Step",
        description: "Complete your first daily task",
        unlocked: |s| s.completions >= 1,
    },
    CatalogEntry {
        code: "daily_dozen",
        title: "Daily Dozen",
        description: "Complete 12 daily tasks",
        unlocked: |s| s.completions >= 12,
    },
    CatalogEntry {
        code: "checked_in",
        title: "Checked In",
        description: "Record your first mood check-in",
        unlocked: |s| s.checkins >= 1,
    },
    CatalogEntry {
        code: "week_of_mood",
        title: "Week of Mood",
        description: "Record 7 mood check-ins",
        unlocked: |s| s.checkins >= 7,
    },
    CatalogEntry {
        code: "one_week_clean",
        title: "One Week Clean",
        description: "Hold a 7-day recovery streak",
        unlocked: |s| s.best_streak_days >= 7,
    },
    CatalogEntry {
        code: "one_month_clean",
        title: "One Month Clean",
        description: "Hold a 30-day recovery streak",
        unlocked: |s| s.best_streak_days >= 30,
    },
    CatalogEntry {
        code: "rising",
        title: "Rising",
        description: "Reach level 2",
        unlocked: |s| level_for_points(s.total_points) >= 2,
    },
    CatalogEntry {
        code: "steady",
        title: "Steady",
        description: "Reach level 3",
        unlocked: |s| level_for_points(s.total_points) >= 3,
    },
    CatalogEntry {
        code: "summit",
        title: "Summit",
        description: "Reach level 5",
        unlocked: |s| level_for_points(s.total_points) >= 5,
    },
];

/// Evaluate the fixed achievement catalog against a progress snapshot.
pub fn achievements_for(snapshot: &ProgressSnapshot) -> Vec<Achievement> {
    CATALOG
        .iter()
        .map(|entry| Achievement {
            code: entry.code.to_string(),
            title: entry.title.to_string(),
            description: entry.description.to_string(),
            unlocked: (entry.unlocked)(snapshot),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bands_are_inclusive_at_boundaries() {
        assert_eq!(level_for_points(0), 1);
        assert_eq!(level_for_points(49), 1);
        assert_eq!(level_for_points(50), 2);
        assert_eq!(level_for_points(149), 2);
        assert_eq!(level_for_points(150), 3);
        assert_eq!(level_for_points(299), 3);
        assert_eq!(level_for_points(300), 4);
        assert_eq!(level_for_points(499), 4);
        assert_eq!(level_for_points(500), 5);
        assert_eq!(level_for_points(9_000), 5);
    }

    #[test]
    fn points_to_next_level_counts_down_to_zero() {
        assert_eq!(points_to_next_level(0), 50);
        assert_eq!(points_to_next_level(49), 1);
        assert_eq!(points_to_next_level(50), 100);
        assert_eq!(points_to_next_level(480), 20);
        assert_eq!(points_to_next_level(500), 0);
        assert_eq!(points_to_next_level(750), 0);
    }

    #[test]
    fn streak_days_floors_partial_days() {
        let start = 1_700_000_000;
        assert_eq!(streak_days(start, start), 0);
        assert_eq!(streak_days(start, start + 86_399), 0);
        assert_eq!(streak_days(start, start + 86_400), 1);
        assert_eq!(streak_days(start, start + 7 * 86_400 + 12), 7);
        assert_eq!(streak_days(start, start - 100), 0);
    }

    #[test]
    fn level_titles_match_the_catalog() {
        assert_eq!(level_title(1), None);
        assert_eq!(level_title(2), Some("Rising"));
        assert_eq!(level_title(3), Some("Steady"));
        assert_eq!(level_title(4), None);
        assert_eq!(level_title(5), Some("Summit"));
    }

    #[test]
    fn achievements_unlock_from_snapshot() {
        let snapshot = ProgressSnapshot {
            total_points: 160,
            completions: 3,
            checkins: 0,
            best_streak_days: 10,
        };
        let achieved = achievements_for(&snapshot);
        let unlocked: Vec<&str> = achieved
            .iter()
            .filter(|a| a.unlocked)
            .map(|a| a.code.as_str())
            .collect();
        assert_eq!(
            unlocked,
            vec!["first_step", "one_week_clean", "rising", "steady"]
        );
    }
}

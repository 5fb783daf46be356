use crate::db::Database;
use crate::db::schema::StateCount;
use crate::domain::filters::RecencyWindow;
use crate::realtime::{ONLINE_CHANNEL, RealtimeHub};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

const TOP_STATES: u32 = 3;

/// Figures shown on the public dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct PublicStats {
    pub total: i64,
    pub class_a: i64,
    pub class_b: i64,
    pub class_c: i64,
    pub recent: i64,
    pub top_states: Vec<StateCount>,
}

/// Aggregates for the public dashboard. "Recent" is the last seven days.
pub async fn public_stats(db: &Database, today: NaiveDate) -> Result<PublicStats> {
    let total = db.count_callsigns().await?;
    let classes = db.class_counts().await?;
    let recent = db
        .count_added_since(RecencyWindow::Week.cutoff(today))
        .await?;
    let top_states = db.top_states(TOP_STATES).await?;
    Ok(PublicStats {
        total,
        class_a: classes.class_a,
        class_b: classes.class_b,
        class_c: classes.class_c,
        recent,
        top_states,
    })
}

pub fn online_count(hub: &RealtimeHub) -> usize {
    hub.online_count(ONLINE_CHANNEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::record;

    #[tokio::test]
    async fn aggregates() {
        let db = Database::in_memory().await.unwrap();
        let rows = [
            ("9M2AAA", "2026-10-15", Some("SELANGOR")),
            ("9W2BBB", "2026-10-01", Some("SELANGOR")),
            ("9W6CCC", "2026-10-10", Some("JOHOR")),
            ("9W3DDD", "2025-01-01", Some("SABAH")),
            ("9W8EEE", "2026-10-09", Some("JOHOR")),
            ("9W9FFF", "2026-10-16", None),
            ("9M4GGG", "2024-05-05", Some("SELANGOR")),
        ];
        for (callsign, added, state) in rows {
            let mut r = record(callsign, added, "2026-01-01 10:00:00");
            r.state = state.map(ToString::to_string);
            db.insert_callsign(&r).await.unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let stats = public_stats(&db, today).await.unwrap();
        assert_eq!(stats.total, 7);
        assert_eq!((stats.class_a, stats.class_b, stats.class_c), (2, 3, 1));
        assert_eq!(stats.recent, 4);
        let states: Vec<_> = stats
            .top_states
            .iter()
            .map(|s| (s.state.as_str(), s.count))
            .collect();
        assert_eq!(states, [("SELANGOR", 3), ("JOHOR", 2), ("SABAH", 1)]);
    }

    #[tokio::test]
    async fn empty_directory() {
        let db = Database::in_memory().await.unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let stats = public_stats(&db, today).await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.class_a, 0);
        assert!(stats.top_states.is_empty());
        assert_eq!(online_count(&RealtimeHub::new()), 0);
    }
}

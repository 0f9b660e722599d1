use super::{Column, Key, Schema, bigint, int};

/// Log of tracked actions (emails sent and opened, contact submissions...).
///
/// `date` is the day number since the Unix epoch, `time` the Unix timestamp.
pub struct TrackerEvent;

impl Schema for TrackerEvent {
    fn table(&self) -> &'static str {
        "tracker_event"
    }

    fn columns(&self) -> Vec<(&'static str, Column)> {
        vec![
            ("tracker_id", bigint(true)),
            ("user_id", bigint(true)),
            ("session_id", bigint(true)),
            ("sub_id", bigint(true)),
            ("date", int(true)),
            ("time", bigint(true)),
        ]
    }

    fn keys(&self) -> Vec<Key> {
        vec![Key {
            name: "tracker_user",
            columns: vec!["date", "tracker_id"],
            unique: false,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_columns_are_non_negative_integers() {
        let sql = TrackerEvent.create_table_sql();
        for column in ["tracker_id", "user_id", "session_id", "sub_id", "time"] {
            assert!(sql.contains(&format!(
                "\"{column}\" BIGINT NOT NULL CHECK (\"{column}\" >= 0)"
            )));
        }
        assert!(sql.contains("\"date\" INTEGER NOT NULL CHECK (\"date\" >= 0)"));
    }

    #[test]
    fn indexes_date_and_tracker() {
        assert_eq!(
            TrackerEvent.index_sql(),
            vec![
                "CREATE INDEX IF NOT EXISTS \"tracker_event_tracker_user\" ON \"tracker_event\" (\"date\", \"tracker_id\")"
                    .to_string()
            ]
        );
    }
}

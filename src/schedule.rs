//! CSV-backed daily schedule (zmanim) with an admin override for mincha.
//!
//! Every patch is a full read-modify-write of the file. Writers are
//! serialized by an in-process mutex, and the file is replaced by renaming a
//! fully written sibling, so readers never observe a half-written schedule.

use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{GatewayError, GatewayResult};

pub const DATE_COLUMN: &str = "engDateString";
pub const MINCHA_COLUMN: &str = "zmanim_mincha";

struct ScheduleTable {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl ScheduleTable {
    fn parse(raw: &str) -> GatewayResult<Self> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        let mut reader = csv::Reader::from_reader(raw.as_bytes());
        let headers = reader.headers()?.clone();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> GatewayResult<usize> {
        self.headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| GatewayError::Storage(format!("schedule has no `{name}` column")))
    }

    fn find_row(&self, date: &str) -> GatewayResult<Option<usize>> {
        let date_index = self.column(DATE_COLUMN)?;
        Ok(self
            .rows
            .iter()
            .position(|row| row.get(date_index) == Some(date)))
    }

    fn render(&self) -> GatewayResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|error| GatewayError::Storage(error.to_string()))
    }
}

pub struct ScheduleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> GatewayResult<ScheduleTable> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|error| {
            GatewayError::Storage(format!("failed to read {}: {error}", self.path.display()))
        })?;
        ScheduleTable::parse(&raw)
    }

    async fn persist(&self, table: &ScheduleTable) -> GatewayResult<()> {
        let bytes = table.render()?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    /// The row for `date` as a header-keyed JSON object.
    pub async fn row_for_date(&self, date: &str) -> GatewayResult<Map<String, Value>> {
        let table = self.load().await?;
        let index = table
            .find_row(date)?
            .ok_or_else(|| GatewayError::not_found("Date not found in CSV"))?;

        Ok(table
            .headers
            .iter()
            .zip(table.rows[index].iter())
            .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
            .collect())
    }

    /// Overwrites the mincha time of the row whose date key equals `date`.
    ///
    /// The admin check comes first so a refused caller learns nothing about
    /// which dates exist.
    pub async fn patch_mincha_time(
        &self,
        date: Option<&str>,
        time: Option<&str>,
        is_admin: bool,
    ) -> GatewayResult<()> {
        if !is_admin {
            return Err(GatewayError::Forbidden("Not authorized".to_string()));
        }

        let date = date.map(str::trim).filter(|value| !value.is_empty());
        let time = time.map(str::trim).filter(|value| !value.is_empty());
        let (Some(date), Some(time)) = (date, time) else {
            return Err(GatewayError::validation("Missing date or time"));
        };

        let _writer = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let mincha_index = table.column(MINCHA_COLUMN)?;
        let row_index = table
            .find_row(date)?
            .ok_or_else(|| GatewayError::not_found("Date not found in CSV"))?;

        let patched: StringRecord = table.rows[row_index]
            .iter()
            .enumerate()
            .map(|(index, value)| if index == mincha_index { time } else { value })
            .collect();
        table.rows[row_index] = patched;

        self.persist(&table).await?;
        tracing::info!(date, time, "overrode mincha time");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ScheduleStore;
    use crate::error::GatewayError;
    use std::sync::Arc;

    const SCHEDULE: &str = "\
engDateString,hebrew_day,zmanim_mincha,parsha
2025-03-01,1 Adar,17:45,Terumah
2025-03-02,2 Adar,17:46,\"Tetzaveh, Zachor\"
2025-03-03,3 Adar,17:47,
";

    fn store_with(contents: &str) -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zmanim.csv");
        std::fs::write(&path, contents).unwrap();
        (dir, ScheduleStore::new(path))
    }

    #[tokio::test]
    async fn non_admin_is_refused_and_file_untouched() {
        let (_dir, store) = store_with(SCHEDULE);

        let error = store
            .patch_mincha_time(Some("2025-03-02"), Some("18:00"), false)
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::Forbidden(_)));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), SCHEDULE);
    }

    #[tokio::test]
    async fn non_admin_is_refused_even_for_unknown_dates() {
        let (_dir, store) = store_with(SCHEDULE);

        let error = store
            .patch_mincha_time(Some("1999-01-01"), Some("18:00"), false)
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::Forbidden(_)));
    }

    #[tokio::test]
    async fn missing_fields_are_validation_errors() {
        let (_dir, store) = store_with(SCHEDULE);

        for (date, time) in [(None, Some("18:00")), (Some("2025-03-02"), None), (Some(" "), Some("18:00"))] {
            let error = store.patch_mincha_time(date, time, true).await.unwrap_err();
            assert!(matches!(error, GatewayError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn admin_patch_changes_only_the_target_field() {
        let (_dir, store) = store_with(SCHEDULE);

        store
            .patch_mincha_time(Some("2025-03-02"), Some("18:05"), true)
            .await
            .unwrap();

        let written = std::fs::read_to_string(store.path()).unwrap();
        let expected = SCHEDULE.replace("2 Adar,17:46", "2 Adar,18:05");
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn unknown_date_is_not_found_and_file_untouched() {
        let (_dir, store) = store_with(SCHEDULE);

        let error = store
            .patch_mincha_time(Some("2025-04-01"), Some("18:05"), true)
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::NotFound(_)));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), SCHEDULE);
    }

    #[tokio::test]
    async fn concurrent_patches_to_different_rows_both_land() {
        let (_dir, store) = store_with(SCHEDULE);
        let store = Arc::new(store);

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .patch_mincha_time(Some("2025-03-01"), Some("18:01"), true)
                    .await
            })
        };
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .patch_mincha_time(Some("2025-03-03"), Some("18:03"), true)
                    .await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let written = std::fs::read_to_string(store.path()).unwrap();
        assert!(written.contains("2025-03-01,1 Adar,18:01,Terumah"));
        assert!(written.contains("2025-03-03,3 Adar,18:03,"));
    }

    #[tokio::test]
    async fn looks_up_row_by_date() {
        let (_dir, store) = store_with(SCHEDULE);

        let row = store.row_for_date("2025-03-02").await.unwrap();

        assert_eq!(row["hebrew_day"], "2 Adar");
        assert_eq!(row["parsha"], "Tetzaveh, Zachor");
        assert!(matches!(
            store.row_for_date("2030-01-01").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("absent.csv"));

        assert!(matches!(
            store.row_for_date("2025-03-02").await,
            Err(GatewayError::Storage(_))
        ));
    }
}

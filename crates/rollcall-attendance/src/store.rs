//! Attendance table, kept in memory and flushed to CSV after every change.
//!
//! File layout is fixed: `Name,Roll Number,Date,Entry Time,Exit Time`, dates
//! as `YYYY-MM-DD`, times as `HH:MM:SS`, an open session has an empty exit
//! field. Roll numbers are written verbatim as text.

use chrono::{NaiveDate, NaiveTime};
use rollcall_core::Identity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header row of the attendance file.
pub const COLUMNS: [&str; 5] = ["Name", "Roll Number", "Date", "Entry Time", "Exit Time"];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{} has unexpected header {found:?}", .path.display())]
    BadHeader { path: PathBuf, found: Vec<String> },
    #[error("{} row {row}: {reason}", .path.display())]
    BadRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },
}

/// How many sessions one identity may have per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    /// At most one row per (identity, date).
    #[default]
    OncePerDay,
    /// A new row may be opened once the previous one is closed.
    Multiple,
}

/// One row of the attendance table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    pub roll_number: String,
    pub date: NaiveDate,
    pub entry_time: NaiveTime,
    pub exit_time: Option<NaiveTime>,
}

impl AttendanceRecord {
    fn belongs_to(&self, identity: &Identity) -> bool {
        self.name == identity.name && self.roll_number == identity.roll_number
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Recorded,
    /// A row for this (identity, date) is still open; nothing was written.
    AlreadyOpen,
    /// The policy already has a closed row for this (identity, date); nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Closed,
    /// No open row for this (identity, date); nothing was written.
    NoOpenRecord,
}

/// Destination for entry/exit events.
pub trait AttendanceSink {
    fn record_entry(
        &mut self,
        identity: &Identity,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<EntryOutcome, StoreError>;

    fn record_exit(
        &mut self,
        identity: &Identity,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<ExitOutcome, StoreError>;
}

/// On-disk shape of a row.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Roll Number")]
    roll_number: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Entry Time")]
    entry_time: String,
    #[serde(rename = "Exit Time")]
    exit_time: String,
}

impl From<&AttendanceRecord> for CsvRow {
    fn from(r: &AttendanceRecord) -> Self {
        Self {
            name: r.name.clone(),
            roll_number: r.roll_number.clone(),
            date: r.date.format(DATE_FORMAT).to_string(),
            entry_time: r.entry_time.format(TIME_FORMAT).to_string(),
            exit_time: r
                .exit_time
                .map(|t| t.format(TIME_FORMAT).to_string())
                .unwrap_or_default(),
        }
    }
}

impl CsvRow {
    fn into_record(self) -> Result<AttendanceRecord, String> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
            .map_err(|e| format!("bad date {:?}: {e}", self.date))?;
        let entry_time = NaiveTime::parse_from_str(&self.entry_time, TIME_FORMAT)
            .map_err(|e| format!("bad entry time {:?}: {e}", self.entry_time))?;
        let exit_time = match self.exit_time.trim() {
            "" => None,
            t => Some(
                NaiveTime::parse_from_str(t, TIME_FORMAT)
                    .map_err(|e| format!("bad exit time {t:?}: {e}"))?,
            ),
        };
        Ok(AttendanceRecord {
            name: self.name,
            roll_number: self.roll_number,
            date,
            entry_time,
            exit_time,
        })
    }
}

/// CSV-backed [`AttendanceSink`] with an in-memory (identity, date) index.
#[derive(Debug)]
pub struct CsvAttendanceStore {
    path: PathBuf,
    policy: SessionPolicy,
    records: Vec<AttendanceRecord>,
    /// Row positions per (identity, date), in storage order.
    index: HashMap<(Identity, NaiveDate), Vec<usize>>,
}

impl CsvAttendanceStore {
    /// Open the table at `path`.
    ///
    /// With `preserve == false` the file is recreated empty. Otherwise existing
    /// rows are loaded (an absent file is created empty).
    pub fn open(path: impl Into<PathBuf>, policy: SessionPolicy, preserve: bool) -> Result<Self, StoreError> {
        let mut store = Self {
            path: path.into(),
            policy,
            records: Vec::new(),
            index: HashMap::new(),
        };

        if preserve && store.path.exists() {
            store.records = read_table(&store.path)?;
            store.rebuild_index();
            tracing::info!(path = %store.path.display(), rows = store.records.len(), "attendance table loaded");
        } else {
            store.flush()?;
            tracing::info!(path = %store.path.display(), "attendance table created");
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, r) in self.records.iter().enumerate() {
            let key = (Identity::new(r.name.clone(), r.roll_number.clone()), r.date);
            self.index.entry(key).or_default().push(pos);
        }
    }

    fn rows_for(&self, identity: &Identity, date: NaiveDate) -> &[usize] {
        self.index
            .get(&(identity.clone(), date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rewrite the whole file via a sibling temp file and rename.
    fn flush(&self) -> Result<(), StoreError> {
        let tmp = temp_path(&self.path);
        let io_err = |source| StoreError::Io {
            path: tmp.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)?;
        wtr.write_record(COLUMNS)?;
        for record in &self.records {
            wtr.serialize(CsvRow::from(record))?;
        }
        wtr.flush().map_err(io_err)?;
        drop(wtr);

        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::trace!(path = %self.path.display(), rows = self.records.len(), "attendance table flushed");
        Ok(())
    }
}

impl AttendanceSink for CsvAttendanceStore {
    fn record_entry(
        &mut self,
        identity: &Identity,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<EntryOutcome, StoreError> {
        let rows = self.rows_for(identity, date);
        if rows.iter().any(|&i| self.records[i].exit_time.is_none()) {
            return Ok(EntryOutcome::AlreadyOpen);
        }
        if self.policy == SessionPolicy::OncePerDay && !rows.is_empty() {
            return Ok(EntryOutcome::Duplicate);
        }

        let pos = self.records.len();
        self.records.push(AttendanceRecord {
            name: identity.name.clone(),
            roll_number: identity.roll_number.clone(),
            date,
            entry_time: time,
            exit_time: None,
        });
        self.index.entry((identity.clone(), date)).or_default().push(pos);

        self.flush()?;
        Ok(EntryOutcome::Recorded)
    }

    fn record_exit(
        &mut self,
        identity: &Identity,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<ExitOutcome, StoreError> {
        let open = self
            .rows_for(identity, date)
            .iter()
            .rev()
            .copied()
            .find(|&i| self.records[i].exit_time.is_none());

        let Some(pos) = open else {
            return Ok(ExitOutcome::NoOpenRecord);
        };
        debug_assert!(self.records[pos].belongs_to(identity));

        self.records[pos].exit_time = Some(time);
        self.flush()?;
        Ok(ExitOutcome::Closed)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attendance".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Load every row of an existing attendance file.
pub fn read_table(path: &Path) -> Result<Vec<AttendanceRecord>, StoreError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let found: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if found != COLUMNS {
        return Err(StoreError::BadHeader {
            path: path.to_path_buf(),
            found,
        });
    }

    let mut records = Vec::new();
    for (i, row) in rdr.deserialize::<CsvRow>().enumerate() {
        let record = row?.into_record().map_err(|reason| StoreError::BadRow {
            path: path.to_path_buf(),
            row: i + 1,
            reason,
        })?;
        records.push(record);
    }
    Ok(records)
}

//! File-backed record store.
//!
//! The store is a TOML document with one table per target:
//!
//! ```toml
//! ["https://example.org/"]
//! down = "no"
//! time = 1700000000
//! down_trigger = "systemctl restart proxy"
//! ```

use log::debug;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use toml::{Table, Value};

use crate::error::Error;
use crate::record::TargetRecord;

const DOWN_KEY: &str = "down";
const TIME_KEY: &str = "time";
const UP_TRIGGER_KEY: &str = "up_trigger";
const DOWN_TRIGGER_KEY: &str = "down_trigger";

#[derive(Debug, Default)]
pub struct RecordStore {
    path: PathBuf,
    table: Table,
}

impl RecordStore {
    /// Reads the store at `path`. A missing file is an empty store.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecordStore, Error> {
        let path = path.as_ref().to_path_buf();
        let table = match fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<Table>(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", path.display());
                Table::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(RecordStore { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the store back to its path, readable by the owner only.
    pub fn save(&self) -> Result<(), Error> {
        let content = toml::to_string(&self.table)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        // An existing file keeps its old mode on open, tighten it before writing
        restrict_permissions(&self.path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn sections(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|(_, value)| value.is_table())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.table.get(section).is_some_and(Value::is_table)
    }

    /// Adds an empty section; an existing one is left as is.
    pub fn add_section(&mut self, section: &str) {
        if !self.has_section(section) {
            self.table
                .insert(section.to_string(), Value::Table(Table::new()));
        }
    }

    fn value(&self, section: &str, key: &str) -> Option<&Value> {
        self.table.get(section)?.as_table()?.get(key)
    }

    /// Boolean lookup, `default` on a missing key or an unrecognised value.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.value(section, key) {
            Some(Value::Boolean(b)) => *b,
            Some(Value::Integer(1)) => true,
            Some(Value::Integer(0)) => false,
            Some(Value::String(s)) => parse_bool(s).unwrap_or(default),
            _ => default,
        }
    }

    /// Integer lookup, `default` on a missing key or an unrecognised value.
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        match self.value(section, key) {
            Some(Value::Integer(i)) => *i,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.value(section, key).and_then(Value::as_str)
    }

    /// Sets `key` in `section`, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<Value>) {
        self.add_section(section);
        if let Some(Value::Table(table)) = self.table.get_mut(section) {
            table.insert(key.to_string(), value.into());
        }
    }

    /// The record for `id`, or a fresh one stamped with `now` if the store has none.
    pub fn record(&self, id: &str, now: i64) -> TargetRecord {
        if !self.has_section(id) {
            return TargetRecord::new(id, now);
        }

        TargetRecord {
            id: id.to_string(),
            down: self.get_bool(id, DOWN_KEY, false),
            last_change: self.get_int(id, TIME_KEY, now),
            is_new: false,
            up_trigger: self.get_str(id, UP_TRIGGER_KEY).map(str::to_string),
            down_trigger: self.get_str(id, DOWN_TRIGGER_KEY).map(str::to_string),
        }
    }

    /// Writes the persistent fields of `record`. Triggers are operator-owned and left alone.
    pub fn put_record(&mut self, record: &TargetRecord) {
        let down = if record.down { "yes" } else { "no" };
        self.set(&record.id, DOWN_KEY, down);
        self.set(&record.id, TIME_KEY, record.last_change);
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Restricts `path` to owner read/write. A missing file is left alone.
pub fn restrict_permissions(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

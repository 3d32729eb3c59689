//! Debounced persistence of simulated control state
//!
//! Simulated elements have no hardware to remember them, so their values
//! are written to one TOML file per device serial. Writes are debounced:
//! each save reschedules a per-device deadline, and the host event loop
//! polls [`StateStore::flush_due`]. A burst of changes (dragging a fader,
//! the link engine rewriting half the matrix) therefore costs one disk
//! write, not hundreds.
//!
//! Persistence failures never interrupt control flow; they are logged and
//! the in-memory state remains authoritative for the session.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::card::DeviceIdentity;

/// Flat string sections, mirroring the on-disk TOML shape.
pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

pub const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("state serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}

struct Pending {
    sections: Sections,
    deadline: Instant,
}

/// Per-serial state files with deadline-based write coalescing.
pub struct StateStore {
    dir: PathBuf,
    debounce: Duration,
    pending: BTreeMap<String, Pending>,
}

impl StateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_debounce(dir, DEBOUNCE)
    }

    pub fn with_debounce(dir: PathBuf, debounce: Duration) -> Self {
        StateStore {
            dir,
            debounce,
            pending: BTreeMap::new(),
        }
    }

    /// Platform config location: `<config>/carmine/state`.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carmine")
            .join("state")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, serial: &str) -> PathBuf {
        self.dir.join(format!("{serial}.toml"))
    }

    fn read_sections(&self, serial: &str) -> Sections {
        let path = self.file_for(serial);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Sections::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read state file");
                return Sections::new();
            }
        };
        match toml::from_str::<Sections>(&text) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed state file ignored");
                Sections::new()
            }
        }
    }

    /// Record one key and (re)arm the device's flush deadline.
    pub fn save(&mut self, identity: &DeviceIdentity, section: &str, key: &str, value: &str) {
        let serial = identity.serial.clone();
        if !self.pending.contains_key(&serial) {
            let mut sections = self.read_sections(&serial);
            let device = sections.entry("device".to_string()).or_default();
            device.insert("serial".to_string(), identity.serial.clone());
            device.insert("model".to_string(), identity.model.clone());
            self.pending.insert(
                serial.clone(),
                Pending {
                    sections,
                    deadline: Instant::now() + self.debounce,
                },
            );
        }
        if let Some(p) = self.pending.get_mut(&serial) {
            p.sections
                .entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
            p.deadline = Instant::now() + self.debounce;
        }
    }

    /// All saved keys of one section, preferring unflushed pending state.
    pub fn load(&self, serial: &str, section: &str) -> BTreeMap<String, String> {
        if let Some(p) = self.pending.get(serial) {
            return p.sections.get(section).cloned().unwrap_or_default();
        }
        self.read_sections(serial)
            .get(section)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Earliest armed deadline, for event-loop scheduling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Write out every device whose deadline has passed. Returns the number
    /// of files written.
    pub fn flush_due(&mut self, now: Instant) -> usize {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(s, _)| s.clone())
            .collect();
        for serial in &due {
            if let Some(p) = self.pending.remove(serial) {
                self.write_file(serial, &p.sections);
            }
        }
        due.len()
    }

    /// Write out everything regardless of deadlines. Called on shutdown.
    pub fn flush_all(&mut self) -> usize {
        let serials: Vec<String> = self.pending.keys().cloned().collect();
        for serial in &serials {
            if let Some(p) = self.pending.remove(serial) {
                self.write_file(serial, &p.sections);
            }
        }
        serials.len()
    }

    fn write_file(&self, serial: &str, sections: &Sections) {
        if let Err(e) = self.try_write(serial, sections) {
            warn!(serial, error = %e, "state flush failed; keeping in-memory state");
        }
    }

    fn try_write(&self, serial: &str, sections: &Sections) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let text = toml::to_string_pretty(sections)?;
        let path = self.file_for(serial);
        fs::write(&path, text)?;
        debug!(path = %path.display(), "state flushed");
        Ok(())
    }

    /// Drop all saved and pending state for one device.
    pub fn remove(&mut self, serial: &str) {
        self.pending.remove(serial);
        let path = self.file_for(serial);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "state file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove state file"),
        }
    }
}

//! JSON booking store with shadow-copy recovery
//!
//! # Write protocol
//!
//! Every mutation runs as one read-modify-write under the exclusive lock:
//!
//! 1. read the full record set (recovering it if needed)
//! 2. apply the change in memory
//! 3. copy the current primary bytes verbatim to the shadow file
//! 4. write the new document to a temp file and rename it over the primary
//!
//! # Read protocol
//!
//! Reads take the shared lock. If the primary is malformed the reader
//! upgrades to the exclusive lock, loads the shadow, restores the primary
//! from it and returns the recovered records. If both files are unusable the
//! result is an empty record set; corruption is never surfaced to callers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{StoreError, PRIMARY_FILE, SHADOW_FILE};
use crate::models::{Booking, BookingStatus, LogEntry};

/// On-disk document layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct BookingDocument {
    #[serde(default)]
    bookings: Vec<Booking>,
}

/// Field changes applied by [`BookingStore::update`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingUpdate {
    pub status: Option<BookingStatus>,
    pub message: Option<String>,
}

impl BookingUpdate {
    /// Status change with its human-readable message
    pub fn status(status: BookingStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Apply to a booking; fails without touching it on an illegal transition
    fn apply(self, booking: &mut Booking) -> Result<(), BookingStatus> {
        if let Some(next) = self.status {
            if !booking.status.can_transition_to(next) {
                return Err(next);
            }
            booking.status = next;
        }
        if let Some(message) = self.message {
            booking.message = Some(message);
        }
        booking.touch();
        Ok(())
    }
}

/// Durable, corruption-resilient booking store
pub struct BookingStore {
    primary: PathBuf,
    shadow: PathBuf,
    lock: RwLock<()>,
}

impl BookingStore {
    /// Create a store over explicit primary and shadow paths
    pub fn new(primary: impl Into<PathBuf>, shadow: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            shadow: shadow.into(),
            lock: RwLock::new(()),
        }
    }

    /// Open the store in `dir`, creating the directory and an empty record
    /// set on first use
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let store = Self::new(dir.join(PRIMARY_FILE), dir.join(SHADOW_FILE));
        store.bootstrap()?;
        Ok(store)
    }

    /// Write an empty document if the primary does not exist yet
    pub fn bootstrap(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        if self.primary.exists() {
            return Ok(());
        }
        self.write_document(&BookingDocument::default())?;
        tracing::info!(path = %self.primary.display(), "Initialized empty booking store");
        Ok(())
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    pub fn shadow_path(&self) -> &Path {
        &self.shadow
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// All bookings in insertion order
    pub fn list(&self) -> Vec<Booking> {
        {
            let _guard = self.lock.read();
            match self.read_file(&self.primary) {
                Ok(bookings) => return bookings,
                Err(StoreError::Corrupted { reason, .. }) => {
                    tracing::warn!(
                        path = %self.primary.display(),
                        reason = %reason,
                        "Booking store is corrupted, recovering from shadow copy"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read booking store");
                    return Vec::new();
                }
            }
        }

        let _guard = self.lock.write();
        self.load_or_recover()
    }

    /// Look up a booking by id
    pub fn get(&self, id: &str) -> Option<Booking> {
        self.list().into_iter().find(|b| b.id == id)
    }

    /// Number of stored bookings
    pub fn count(&self) -> usize {
        self.list().len()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a new booking; false if the id is already taken
    pub fn create(&self, booking: Booking) -> bool {
        let id = booking.id.clone();
        self.report(
            "create",
            &id,
            self.modify(|bookings| {
                if bookings.iter().any(|b| b.id == booking.id) {
                    tracing::warn!(booking_id = %booking.id, "Duplicate booking id, not created");
                    return false;
                }
                bookings.push(booking);
                true
            }),
        )
    }

    /// Apply field changes; false if the booking is missing or the status
    /// change is not a legal transition
    pub fn update(&self, id: &str, update: BookingUpdate) -> bool {
        self.report(
            "update",
            id,
            self.modify(|bookings| {
                let Some(booking) = bookings.iter_mut().find(|b| b.id == id) else {
                    tracing::debug!(booking_id = %id, "Update for unknown booking");
                    return false;
                };
                let from = booking.status;
                match update.apply(booking) {
                    Ok(()) => true,
                    Err(to) => {
                        tracing::warn!(
                            booking_id = %id,
                            from = %from,
                            to = %to,
                            "Rejected illegal status transition"
                        );
                        false
                    }
                }
            }),
        )
    }

    /// Move a booking to `status` with a status message
    pub fn transition(&self, id: &str, status: BookingStatus, message: impl Into<String>) -> bool {
        self.update(id, BookingUpdate::status(status, message))
    }

    /// Remove a booking; false if it did not exist
    pub fn delete(&self, id: &str) -> bool {
        self.report(
            "delete",
            id,
            self.modify(|bookings| {
                let before = bookings.len();
                bookings.retain(|b| b.id != id);
                bookings.len() != before
            }),
        )
    }

    /// Append to a booking's log and refresh `updated_at`
    pub fn append_log(&self, id: &str, entry: LogEntry) -> bool {
        self.report(
            "append_log",
            id,
            self.modify(|bookings| match bookings.iter_mut().find(|b| b.id == id) {
                Some(booking) => {
                    booking.logs.push(entry);
                    booking.touch();
                    true
                }
                None => false,
            }),
        )
    }

    /// Drop every booking
    pub fn clear(&self) -> bool {
        self.report(
            "clear",
            "*",
            self.modify(|bookings| {
                bookings.clear();
                true
            }),
        )
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Exclusive read-modify-write. `op` returns whether anything changed.
    fn modify<F>(&self, op: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<Booking>) -> bool,
    {
        let _guard = self.lock.write();

        let mut bookings = self.load_or_recover();
        if !op(&mut bookings) {
            return Ok(false);
        }

        self.snapshot_to_shadow()?;
        self.write_document(&BookingDocument { bookings })?;
        Ok(true)
    }

    /// Collapse a mutation result into the boolean contract, logging errors
    fn report(&self, op: &str, id: &str, result: Result<bool, StoreError>) -> bool {
        match result {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(operation = op, booking_id = %id, error = %e, "Booking store write failed");
                false
            }
        }
    }

    /// Primary, else shadow (restoring the primary), else empty.
    ///
    /// Caller must hold the exclusive lock.
    fn load_or_recover(&self) -> Vec<Booking> {
        let primary_error = match self.read_file(&self.primary) {
            Ok(bookings) => return bookings,
            Err(e) => e,
        };

        match self.read_file(&self.shadow) {
            Ok(bookings) if self.shadow.exists() => {
                match self.restore_primary() {
                    Ok(()) => tracing::warn!(
                        path = %self.primary.display(),
                        recovered = bookings.len(),
                        "Restored booking store from shadow copy"
                    ),
                    Err(e) => tracing::error!(error = %e, "Failed to restore primary from shadow"),
                }
                bookings
            }
            Ok(_) => {
                tracing::error!(
                    error = %primary_error,
                    "Booking store unreadable and no shadow copy exists, starting empty"
                );
                Vec::new()
            }
            Err(shadow_error) => {
                tracing::error!(
                    primary_error = %primary_error,
                    shadow_error = %shadow_error,
                    "Booking store and shadow copy are both unusable, starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Read one store file; a missing file is an empty record set
    fn read_file(&self, path: &Path) -> Result<Vec<Booking>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        serde_json::from_slice::<BookingDocument>(&bytes)
            .map(|doc| doc.bookings)
            .map_err(|e| StoreError::Corrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Copy the current primary bytes verbatim to the shadow
    fn snapshot_to_shadow(&self) -> Result<(), StoreError> {
        match fs::copy(&self.primary, &self.shadow) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.shadow, e)),
        }
    }

    fn restore_primary(&self) -> Result<(), StoreError> {
        let bytes = fs::read(&self.shadow).map_err(|e| StoreError::io(&self.shadow, e))?;
        self.replace_primary(|writer| {
            writer
                .write_all(&bytes)
                .map_err(|e| StoreError::io(&self.primary, e))
        })
    }

    fn write_document(&self, document: &BookingDocument) -> Result<(), StoreError> {
        self.replace_primary(|writer| {
            serde_json::to_writer_pretty(writer, document).map_err(StoreError::from)
        })
    }

    /// Write through a temp file, then rename over the primary
    fn replace_primary<F>(&self, write: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<(), StoreError>,
    {
        let temp_path = self.primary.with_extension("json.tmp");

        let file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush().map_err(|e| StoreError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.primary).map_err(|e| StoreError::io(&self.primary, e))?;

        tracing::debug!(path = %self.primary.display(), "Booking store saved");
        Ok(())
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::JournalEntry;

/// Encode a single entry to [len][bincode][crc32] format.
fn encode_entry(writer: &mut impl Write, entry: &JournalEntry) -> io::Result<()> {
    let payload =
        bincode::serialize(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only reconciliation journal.
///
/// Format per entry: `[u32: len][bincode: JournalEntry][u32: crc32]`.
/// A torn trailing entry from a crash is dropped on replay.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    /// Open (or create) the journal at `path`, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, entry: &JournalEntry) -> io::Result<()> {
        self.append_buffered(entry)?;
        self.flush_sync()
    }

    /// Buffer an entry. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, entry: &JournalEntry) -> io::Result<()> {
        encode_entry(&mut self.writer, entry)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("journal.tmp")
    }

    /// Write the compacted entries to a temp file and fsync.
    pub fn write_compact_file(path: &Path, entries: &[JournalEntry]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            encode_entry(&mut writer, entry)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the journal and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, entries: &[JournalEntry]) -> io::Result<()> {
        Self::write_compact_file(&self.path, entries)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read back every valid entry. Stops at the first truncated or corrupt one.
    pub fn replay(path: &Path) -> io::Result<Vec<JournalEntry>> {
        Self::scan(path).map(|(entries, _)| entries)
    }

    /// Replay, then cut the file back to its last valid entry so new appends
    /// don't land behind a torn or corrupt tail. Call before `open`.
    pub fn recover(path: &Path) -> io::Result<Vec<JournalEntry>> {
        let (entries, valid_len) = Self::scan(path)?;
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                path = %path.display(),
                kept = valid_len,
                dropped = len - valid_len,
                "truncating journal after last valid entry"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(entries)
    }

    /// Valid entries and the byte offset just past the last one.
    fn scan(path: &Path) -> io::Result<(Vec<JournalEntry>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            let record_len = 4 + len + 4;
            if offset + record_len > file_len {
                break; // truncated
            }

            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), offset, "journal entry failed crc, stopping replay");
                break;
            }

            match bincode::deserialize::<JournalEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
            offset += record_len;
        }

        Ok((entries, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("frontdesk_test_journal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn orphan(room_id: RoomId) -> JournalEntry {
        let start = parse_calendar_date("2024-06-01").unwrap();
        let end = parse_calendar_date("2024-06-04").unwrap();
        JournalEntry::PaymentOrphaned(OrphanedPayment {
            ticket: Ulid::new(),
            attempt: Ulid::new(),
            room_id,
            guest_id: 3,
            range: DateRange::new(start, end).unwrap(),
            amount: 36_000,
            currency: "USD".into(),
            payment_reference: "PAY-1".into(),
            detail: "room already booked".into(),
            recorded_at: 1_717_000_000_000,
        })
    }

    fn resolved(ticket: Ulid) -> JournalEntry {
        JournalEntry::Resolved {
            ticket,
            resolution: Resolution::Refunded,
            note: Some("refund issued".into()),
            resolved_at: 1_717_000_100_000,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.journal");
        let _ = fs::remove_file(&path);

        let first = orphan(1);
        let JournalEntry::PaymentOrphaned(ref o) = first else { unreachable!() };
        let entries = vec![first.clone(), resolved(o.ticket)];
        {
            let mut journal = Journal::open(&path).unwrap();
            for e in &entries {
                journal.append(e).unwrap();
            }
        }

        assert_eq!(Journal::replay(&path).unwrap(), entries);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn.journal");
        let _ = fs::remove_file(&path);

        let entry = orphan(2);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&entry).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Journal::replay(&path).unwrap(), vec![entry]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_cuts_torn_tail_before_new_appends() {
        let path = tmp_path("recover_torn.journal");
        let _ = fs::remove_file(&path);

        let first = orphan(8);
        let later = orphan(9);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xFF, 0xFF, 0, 0, 7, 7, 7]).unwrap();
        }

        assert_eq!(Journal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&later).unwrap();
        }

        assert_eq!(Journal::replay(&path).unwrap(), vec![first, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_leaves_clean_journal_alone() {
        let path = tmp_path("recover_clean.journal");
        let _ = fs::remove_file(&path);
        assert!(Journal::recover(&path).unwrap().is_empty());
        assert!(!path.exists());

        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&orphan(10)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(Journal::recover(&path).unwrap().len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.journal");
        let _ = fs::remove_file(&path);
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.journal");
        let _ = fs::remove_file(&path);

        {
            let payload = bincode::serialize(&orphan(3)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Journal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.journal");
        let _ = fs::remove_file(&path);

        let kept = orphan(4);
        let settled = orphan(5);
        let JournalEntry::PaymentOrphaned(ref s) = settled else { unreachable!() };
        let later = orphan(6);
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&kept).unwrap();
            journal.append(&settled).unwrap();
            journal.append(&resolved(s.ticket)).unwrap();
            let before = fs::metadata(&path).unwrap().len();

            journal.compact(std::slice::from_ref(&kept)).unwrap();
            assert_eq!(journal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);

            journal.append(&later).unwrap();
        }

        assert_eq!(Journal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tmp_path("nested_parent");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("inner").join("queue.journal");
        let mut journal = Journal::open(&path).unwrap();
        journal.append_buffered(&orphan(7)).unwrap();
        assert_eq!(journal.appends_since_compact(), 1);
        journal.flush_sync().unwrap();
        assert_eq!(Journal::replay(&path).unwrap().len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}

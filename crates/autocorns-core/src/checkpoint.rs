//! NDJSON checkpoint store
//!
//! A checkpoint is the full set of records a stage has fetched so far. It is
//! read once when a run starts and rewritten once when it ends; only one run
//! may own a given file at a time.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::ndjson;
use crate::record::{CheckpointRecord, WorkItem, CHECKPOINT_SCHEMA_VERSION};
use crate::Result;

/// Records read from a checkpoint file
#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    pub records: Vec<CheckpointRecord>,
    /// Lines that could not be parsed or carry an unknown schema version
    pub skipped_lines: usize,
}

/// A checkpoint file on disk
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every parsable record
    ///
    /// Malformed lines are skipped with a warning rather than failing the
    /// whole load. A missing file loads as an empty checkpoint.
    pub fn load(&self) -> Result<LoadedCheckpoint> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No checkpoint yet, starting empty");
                return Ok(LoadedCheckpoint::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = LoadedCheckpoint::default();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<CheckpointRecord>(trimmed) {
                Ok(record) if record.schema_version == CHECKPOINT_SCHEMA_VERSION => {
                    loaded.records.push(record);
                }
                Ok(record) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        schema_version = record.schema_version,
                        "Skipping checkpoint line with unsupported schema version"
                    );
                    loaded.skipped_lines += 1;
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping malformed checkpoint line"
                    );
                    loaded.skipped_lines += 1;
                }
            }
        }

        info!(
            path = %self.path.display(),
            records = loaded.records.len(),
            skipped = loaded.skipped_lines,
            "Checkpoint loaded"
        );

        Ok(loaded)
    }

    /// Overwrite the checkpoint with `records`
    ///
    /// The file is written beside the target and renamed into place so an
    /// interrupted save leaves the previous checkpoint intact.
    pub fn save(&self, records: &[CheckpointRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp_name = self.path.file_name().map(OsString::from).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        {
            let writer = BufWriter::new(File::create(&tmp_path)?);
            ndjson::write_lines(writer, records)?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            "Checkpoint saved"
        );

        Ok(())
    }
}

/// Drop records read before `min_block`
pub fn filter_fresh(records: Vec<CheckpointRecord>, min_block: u64) -> Vec<CheckpointRecord> {
    records
        .into_iter()
        .filter(|r| r.block_number >= min_block)
        .collect()
}

/// Keep only records satisfying `predicate`
pub fn filter_validity<F>(records: Vec<CheckpointRecord>, predicate: F) -> Vec<CheckpointRecord>
where
    F: Fn(&CheckpointRecord) -> bool,
{
    records.into_iter().filter(|r| predicate(r)).collect()
}

/// Drop records older than the upstream value their work item was derived from
///
/// A body-part count read before the current DNA record is stale even though
/// it is otherwise complete.
pub fn filter_superseded(records: Vec<CheckpointRecord>, items: &[WorkItem]) -> Vec<CheckpointRecord> {
    let reference_blocks: HashMap<u64, u64> = items
        .iter()
        .filter_map(|item| item.block_number.map(|block| (item.token_id, block)))
        .collect();

    records
        .into_iter()
        .filter(|r| match reference_blocks.get(&r.token_id) {
            Some(reference) => *reference <= r.block_number,
            None => true,
        })
        .collect()
}

/// Evict each record independently with probability `leak_rate`
///
/// Forces a slice of otherwise-fresh records to be refetched so a checkpoint
/// does not go stale one record at a time. A rate of 0 keeps everything and a
/// rate of 1 keeps nothing.
pub fn leak<R: Rng + ?Sized>(
    records: Vec<CheckpointRecord>,
    leak_rate: f64,
    rng: &mut R,
) -> Vec<CheckpointRecord> {
    if leak_rate <= 0.0 {
        return records;
    }

    let before = records.len();
    let kept: Vec<CheckpointRecord> = records
        .into_iter()
        .filter(|_| rng.gen::<f64>() >= leak_rate)
        .collect();

    debug!(before, after = kept.len(), leak_rate, "Leaked checkpoint records");
    kept
}

/// Remove work items whose key already appears among `records`
pub fn apply<T, K, FI, FR>(
    work_items: Vec<T>,
    records: &[CheckpointRecord],
    item_key: FI,
    record_key: FR,
) -> Vec<T>
where
    K: Eq + Hash,
    FI: Fn(&T) -> K,
    FR: Fn(&CheckpointRecord) -> K,
{
    let known: HashSet<K> = records.iter().map(record_key).collect();
    work_items
        .into_iter()
        .filter(|item| !known.contains(&item_key(item)))
        .collect()
}

/// [`apply`] keyed by token ID
pub fn skip_known(work_items: Vec<WorkItem>, records: &[CheckpointRecord]) -> Vec<WorkItem> {
    apply(work_items, records, |item| item.token_id, |record| record.token_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn dna_record(token_id: u64, block_number: u64) -> CheckpointRecord {
        CheckpointRecord::new(
            token_id,
            block_number,
            Payload::Dna {
                dna: format!("{}00", token_id),
            },
        )
    }

    #[test]
    fn test_apply_is_set_difference() {
        let items = WorkItem::range(1, 6).unwrap();
        let records = vec![dna_record(2, 10), dna_record(4, 10), dna_record(99, 10)];

        let remaining = skip_known(items, &records);
        let ids: Vec<u64> = remaining.iter().map(|i| i.token_id).collect();
        assert_eq!(ids, vec![1, 3, 5, 6]);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let items = WorkItem::range(1, 6).unwrap();
        let records = vec![dna_record(1, 10), dna_record(6, 10)];

        let once = skip_known(items, &records);
        let twice = skip_known(once.clone(), &records);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_filter_fresh_uses_floor() {
        let records = vec![dna_record(1, 99), dna_record(2, 100), dna_record(3, 150)];
        let fresh = filter_fresh(records, 100);
        assert_eq!(fresh.iter().map(|r| r.token_id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_filter_validity_drops_placeholders() {
        let mut records = vec![dna_record(1, 10)];
        records.push(CheckpointRecord::new(2, 10, Payload::Dna { dna: "2".into() }));

        let valid = filter_validity(records, |r| r.payload.is_complete());
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].token_id, 1);
    }

    #[test]
    fn test_filter_superseded_compares_reference_block() {
        let records = vec![
            CheckpointRecord::new(
                1,
                100,
                Payload::MythicBodyParts {
                    dna: "11".into(),
                    num_mythic_body_parts: 1,
                },
            ),
            CheckpointRecord::new(
                2,
                100,
                Payload::MythicBodyParts {
                    dna: "22".into(),
                    num_mythic_body_parts: 0,
                },
            ),
        ];
        let mut newer_dna = WorkItem::new(1);
        newer_dna.block_number = Some(120);
        let mut same_dna = WorkItem::new(2);
        same_dna.block_number = Some(100);

        let kept = filter_superseded(records, &[newer_dna, same_dna]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].token_id, 2);
    }

    #[test]
    fn test_leak_boundaries() {
        let records: Vec<_> = (1..=50).map(|i| dna_record(i, 10)).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let none_leaked = leak(records.clone(), 0.0, &mut rng);
        assert_eq!(none_leaked, records);

        let all_leaked = leak(records, 1.0, &mut rng);
        assert!(all_leaked.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("dnas.jsonl"));
        let records = vec![dna_record(1, 10), dna_record(2, 11)];

        store.save(&records).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.records, records);
        assert_eq!(loaded.skipped_lines, 0);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.jsonl"));
        let loaded = store.load().unwrap();
        assert!(loaded.records.is_empty());
    }

    #[test]
    fn test_load_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dnas.jsonl");
        let good = serde_json::to_string(&dna_record(5, 10)).unwrap();
        let future = good.replace("\"schema_version\":1", "\"schema_version\":9");
        std::fs::write(
            &path,
            format!("{good}\n{{\"token_id\": 6, \"dna\": \"12\"}}\n{future}\n"),
        )
        .unwrap();

        let loaded = CheckpointStore::new(&path).load().unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].token_id, 5);
        assert_eq!(loaded.skipped_lines, 2);
    }

    #[test]
    fn test_save_temp_file_is_per_checkpoint() {
        let dir = tempdir().unwrap();
        let jsonl = CheckpointStore::new(dir.path().join("dnas.jsonl"));
        let ndjson = CheckpointStore::new(dir.path().join("dnas.ndjson"));
        let named_tmp = CheckpointStore::new(dir.path().join("dnas.tmp"));

        jsonl.save(&[dna_record(1, 10)]).unwrap();
        ndjson.save(&[dna_record(2, 10)]).unwrap();
        named_tmp.save(&[dna_record(3, 10)]).unwrap();

        assert_eq!(jsonl.load().unwrap().records[0].token_id, 1);
        assert_eq!(ndjson.load().unwrap().records[0].token_id, 2);
        assert_eq!(named_tmp.load().unwrap().records[0].token_id, 3);

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["dnas.jsonl", "dnas.ndjson", "dnas.tmp"]);
    }
}

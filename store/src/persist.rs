//! Per-shard persistence.
//!
//! Each shard snapshots to `shard_<i>.dat` as a flat record stream:
//! `[u32 key_len][u32 val_len][key][val]*`, lengths little-endian, values in
//! their at-rest form. Snapshots are written to a temp file and renamed so a
//! crashed sync never truncates the previous snapshot.

use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::routing;
use crate::store::{Stored, StoreShard};

pub(crate) struct Persister {
    dir: PathBuf,
}

impl Persister {
    pub(crate) fn new(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Persister {
            dir: dir.to_path_buf(),
        })
    }

    fn shard_file(&self, idx: usize) -> PathBuf {
        self.dir.join(format!("shard_{}.dat", idx))
    }

    /// Snapshot one shard. Sub-map read locks are taken one at a time.
    pub(crate) fn persist_shard(&self, idx: usize, shard: &StoreShard) -> Result<(), StoreError> {
        let final_path = self.shard_file(idx);
        let tmp_path = self.dir.join(format!("shard_{}.dat.tmp", idx));

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for bucket in &shard.buckets {
                for submap in &bucket.submaps {
                    let map = submap.map.read();
                    for (key, stored) in map.iter() {
                        let value = stored.stored_bytes();
                        writer.write_all(&(key.len() as u32).to_le_bytes())?;
                        writer.write_all(&(value.len() as u32).to_le_bytes())?;
                        writer.write_all(key)?;
                        writer.write_all(value)?;
                    }
                }
            }
            writer.flush()?;
        }

        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Load one shard's records. A missing file is an empty shard. Returns
    /// the number of entries loaded.
    pub(crate) fn load_shard(
        &self,
        idx: usize,
        shard: &StoreShard,
        buckets_per_shard: usize,
        compression: bool,
    ) -> Result<usize, StoreError> {
        let path = self.shard_file(idx);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let file_name = path.display().to_string();
        let mut reader = BufReader::new(file);

        let mut loaded = 0usize;
        loop {
            let key_len = match read_u32(&mut reader)? {
                Some(n) => n as usize,
                None => break,
            };
            let val_len = match read_u32(&mut reader)? {
                Some(n) => n as usize,
                None => {
                    return Err(StoreError::CorruptRecord {
                        file: file_name.clone(),
                        reason: "truncated value length",
                    })
                }
            };

            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key).map_err(|_| StoreError::CorruptRecord {
                file: file_name.clone(),
                reason: "truncated key",
            })?;
            let mut value = vec![0u8; val_len];
            reader
                .read_exact(&mut value)
                .map_err(|_| StoreError::CorruptRecord {
                    file: file_name.clone(),
                    reason: "truncated value",
                })?;

            let key = Bytes::from(key);
            let stored = if compression {
                Stored::Compressed(Bytes::from(value))
            } else {
                Stored::Raw(Bytes::from(value))
            };

            // Bucket and sub-map placement are recomputed from the key; the
            // file only fixes the shard.
            let (bucket, sub) = routing::locate_in_shard(&key, buckets_per_shard);
            let submap = &shard.buckets[bucket].submaps[sub];
            submap.map.write().insert(key, stored);
            loaded += 1;
        }

        Ok(loaded)
    }
}

/// Read a little-endian u32, treating EOF at a record boundary as the clean
/// end of the stream.
fn read_u32<R: Read>(reader: &mut R) -> Result<Option<u32>, StoreError> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

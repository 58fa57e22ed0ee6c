//! Local secret storage
//!
//! One JSON file per record under a kind directory: DKG material while a
//! group is forming, the derived key share once it is active, and the private
//! half of every DE submitted on chain. Writes go to a temp file and are
//! renamed into place; deletes overwrite the file before unlinking.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroize;

use tessera_coordinator::Round1Info;
use tessera_core::{signing::PrivateDe, GroupId, MemberId, Point, PubDe, Scalar};

use crate::error::{AgentError, Result};

const DKG_DIR: &str = "dkg";
const GROUP_DIR: &str = "groups";
const DE_DIR: &str = "des";
const DE_INDEX_FILE: &str = "de_index.json";

/// Secrets of an in-progress DKG, kept until round 3 completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRecord {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub threshold: u64,
    #[serde(with = "tessera_core::types::hex_vec")]
    pub dkg_context: Vec<u8>,
    pub one_time_priv: Scalar,
    pub one_time_pub: Point,
    pub coefficients: Vec<Scalar>,
    /// What was submitted, so a restart can resubmit the same data
    pub round1_info: Round1Info,
    pub created_at: DateTime<Utc>,
}

impl Drop for DkgRecord {
    fn drop(&mut self) {
        self.one_time_priv.zeroize();
        for c in &mut self.coefficients {
            c.zeroize();
        }
    }
}

/// Key share of an active group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub group_pub_key: Point,
    pub private_key: Scalar,
    pub created_at: DateTime<Utc>,
}

impl Drop for GroupRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Private half of a DE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeRecord {
    pub pub_de: PubDe,
    pub priv_d: Scalar,
    pub priv_e: Scalar,
    pub index: u64,
}

impl DeRecord {
    pub fn new(de: &PrivateDe, index: u64) -> Self {
        Self {
            pub_de: de.pub_de,
            priv_d: de.priv_d,
            priv_e: de.priv_e,
            index,
        }
    }
}

impl Drop for DeRecord {
    fn drop(&mut self) {
        self.priv_d.zeroize();
        self.priv_e.zeroize();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeIndex {
    next: u64,
}

/// File-backed store for agent secrets
pub struct AgentStore {
    /// Base path for storage
    store_path: PathBuf,

    /// Serialises DE index allocation
    de_index_lock: Mutex<()>,
}

impl AgentStore {
    /// Open (or create) a store rooted at `store_path`
    pub fn new(store_path: PathBuf) -> Result<Self> {
        for dir in [DKG_DIR, GROUP_DIR, DE_DIR] {
            std::fs::create_dir_all(store_path.join(dir))?;
        }
        Ok(Self {
            store_path,
            de_index_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    // ----------------------------------------
    // DKG records
    // ----------------------------------------

    pub fn set_dkg(&self, record: &DkgRecord) -> Result<()> {
        write_json(&self.dkg_path(record.group_id), record)
    }

    pub fn get_dkg(&self, group_id: GroupId) -> Result<Option<DkgRecord>> {
        read_json(&self.dkg_path(group_id))
    }

    pub fn delete_dkg(&self, group_id: GroupId) -> Result<()> {
        secure_delete(&self.dkg_path(group_id))
    }

    pub fn list_dkgs(&self) -> Result<Vec<GroupId>> {
        self.list_ids(DKG_DIR)
    }

    // ----------------------------------------
    // Group records
    // ----------------------------------------

    pub fn set_group(&self, record: &GroupRecord) -> Result<()> {
        write_json(&self.group_path(record.group_id), record)
    }

    pub fn get_group(&self, group_id: GroupId) -> Result<Option<GroupRecord>> {
        read_json(&self.group_path(group_id))
    }

    pub fn delete_group(&self, group_id: GroupId) -> Result<()> {
        secure_delete(&self.group_path(group_id))
    }

    pub fn list_groups(&self) -> Result<Vec<GroupId>> {
        self.list_ids(GROUP_DIR)
    }

    // ----------------------------------------
    // DE records
    // ----------------------------------------

    pub fn set_de(&self, record: &DeRecord) -> Result<()> {
        write_json(&self.de_path(&record.pub_de), record)
    }

    pub fn get_de(&self, pub_de: &PubDe) -> Result<DeRecord> {
        read_json(&self.de_path(pub_de))?
            .ok_or_else(|| AgentError::NotFound(format!("DE {}", pub_de.pub_d.short())))
    }

    pub fn has_de(&self, pub_de: &PubDe) -> bool {
        self.de_path(pub_de).exists()
    }

    pub fn delete_de(&self, pub_de: &PubDe) -> Result<()> {
        secure_delete(&self.de_path(pub_de))
    }

    pub fn de_count(&self) -> Result<usize> {
        Ok(json_files(&self.store_path.join(DE_DIR))?.len())
    }

    /// Reserve `n` consecutive DE derivation indices
    ///
    /// The counter is persisted before the range is handed out, so a crash
    /// never reuses an index.
    pub fn allocate_de_indices(&self, n: u64) -> Result<Range<u64>> {
        let _guard = self
            .de_index_lock
            .lock()
            .map_err(|_| AgentError::Store("DE index lock poisoned".to_string()))?;
        let path = self.store_path.join(DE_INDEX_FILE);
        let mut index: DeIndex = read_json(&path)?.unwrap_or_default();
        let start = index.next;
        index.next += n;
        write_json(&path, &index)?;
        Ok(start..index.next)
    }

    // ----------------------------------------
    // Paths
    // ----------------------------------------

    fn dkg_path(&self, group_id: GroupId) -> PathBuf {
        self.store_path.join(DKG_DIR).join(format!("{}.json", group_id))
    }

    fn group_path(&self, group_id: GroupId) -> PathBuf {
        self.store_path.join(GROUP_DIR).join(format!("{}.json", group_id))
    }

    fn de_path(&self, pub_de: &PubDe) -> PathBuf {
        self.store_path.join(DE_DIR).join(format!("{}.json", pub_de.key_hex()))
    }

    fn list_ids(&self, dir: &str) -> Result<Vec<GroupId>> {
        let mut ids: Vec<GroupId> = json_files(&self.store_path.join(dir))?
            .iter()
            .filter_map(|path| path.file_stem()?.to_str()?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;

    // Write to temp file first, then rename for atomicity
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, &content)?;
    std::fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Overwrite with zeros, then unlink
///
/// A file removed concurrently counts as deleted.
fn secure_delete(path: &Path) -> Result<()> {
    let overwrite = std::fs::metadata(path)
        .and_then(|meta| std::fs::write(path, vec![0u8; meta.len() as usize]))
        .and_then(|()| std::fs::remove_file(path));
    match overwrite {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

//! # Reconciler
//!
//! Diffs one account's ledger records against a remote snapshot.
//!
//! 1. **Refresh** the remote facet of every record that has a remote id.
//!    Missing from a full snapshot, or marked removed, means the remote copy
//!    is gone. Changed metadata (or a missing local replica) means the remote
//!    is ahead. Records without a remote id adopt an unclaimed snapshot entry
//!    with the same title and folder instead of being uploaded again.
//! 2. **Discover** unclaimed snapshot entries as new records.
//! 3. **Resolve** each record's `(local, remote)` change pair:
//!
//! | local            | remote           | operation                    |
//! |------------------|------------------|------------------------------|
//! | Added / Modified | any              | none (uploaded at edit time) |
//! | None             | Added / Modified | Download                     |
//! | None             | None             | none                         |
//! | None             | Removed          | Remove                       |
//! | Removed          | Added / Modified | split: Download clone + Remove original |
//! | Removed          | None / Removed   | Remove                       |
//!
//! A split never deletes the remote object: the original record gives its
//! remote facet to the clone before either operation runs.
//!
//! With a partial (incremental) snapshot only records whose remote id is in
//! the snapshot are touched.

use crate::listing::{RemoteFileDescriptor, SyncRemoteFiles};
use crate::operation::{Download, Remove, SyncOperation};
use core_ledger::{AccountId, ChangeFlag, CursorUpdate, FileRecord, FileRecordId, LedgerBatch};
use std::collections::HashSet;
use tracing::debug;

/// Ledger mutations plus the operations to run afterwards
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub batch: LedgerBatch,
    pub operations: Vec<SyncOperation>,
    /// Records split because of a local delete racing a remote edit
    pub conflicts: usize,
}

impl ReconcilePlan {
    pub fn operations_for(&self, record_id: &FileRecordId) -> Vec<&SyncOperation> {
        self.operations
            .iter()
            .filter(|op| op.record_id() == *record_id)
            .collect()
    }
}

struct Working {
    record: FileRecord,
    changed: bool,
    is_new: bool,
}

/// Compute the plan for one account
///
/// `missing_replicas` names records whose `local_file` is set but absent from
/// the cache. The snapshot's cursor becomes the account's new cursor.
pub fn reconcile(
    account_id: AccountId,
    records: &[FileRecord],
    snapshot: &SyncRemoteFiles,
    missing_replicas: &HashSet<FileRecordId>,
) -> ReconcilePlan {
    let mut claimed: HashSet<String> = records
        .iter()
        .filter_map(|r| r.remote_id.clone())
        .collect();

    let mut working: Vec<Working> = Vec::with_capacity(records.len());
    for record in records {
        let mut record = record.clone();
        let changed = match record.remote_id.clone() {
            Some(remote_id) => match snapshot.get(&remote_id) {
                None if snapshot.is_full => mark_remote_removed(&mut record),
                None => false,
                Some(entry) if entry.removed => mark_remote_removed(&mut record),
                Some(entry) => {
                    let replica_missing = !record.local_deleted()
                        && (record.local_file.is_none() || missing_replicas.contains(&record.id));
                    refresh_remote_facet(&mut record, entry, replica_missing)
                }
            },
            None if !record.local_deleted() => {
                match find_adoptable(&record, snapshot, &claimed) {
                    Some(entry) => {
                        debug!(record_id = %record.id, remote_id = %entry.remote_id, "Adopting same-named remote file");
                        claimed.insert(entry.remote_id.clone());
                        adopt(&mut record, entry);
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        working.push(Working {
            record,
            changed,
            is_new: false,
        });
    }

    for entry in snapshot.iter() {
        if entry.removed || claimed.contains(&entry.remote_id) {
            continue;
        }
        claimed.insert(entry.remote_id.clone());
        working.push(Working {
            record: FileRecord::new_remote(
                account_id,
                entry.remote_id.clone(),
                entry.title.clone(),
                entry.folder.clone(),
                entry.modified_at,
                entry.hash.clone(),
            ),
            changed: true,
            is_new: true,
        });
    }

    let mut plan = ReconcilePlan {
        batch: LedgerBatch {
            cursor: CursorUpdate::Set(snapshot.cursor.clone()),
            ..LedgerBatch::default()
        },
        ..ReconcilePlan::default()
    };

    for mut item in working {
        let record = &mut item.record;
        match (record.local_change, record.remote_change) {
            (ChangeFlag::Added | ChangeFlag::Modified, _) => {}
            (ChangeFlag::None, ChangeFlag::Added | ChangeFlag::Modified) => {
                if let Some(download) = Download::for_record(record) {
                    plan.operations.push(SyncOperation::Download(download));
                }
            }
            (ChangeFlag::None, ChangeFlag::None) => {}
            (ChangeFlag::None, ChangeFlag::Removed) => {
                plan.operations
                    .push(SyncOperation::Remove(Remove::for_record(record)));
            }
            (ChangeFlag::Removed, ChangeFlag::Added | ChangeFlag::Modified)
                if record.remote_id.is_some() =>
            {
                let clone = split_remote_facet(record);
                debug!(
                    record_id = %record.id,
                    clone_id = %clone.id,
                    "Local delete raced a remote edit; keeping remote copy as a new file"
                );
                item.changed = true;
                plan.conflicts += 1;
                if let Some(download) = Download::for_record(&clone) {
                    plan.operations.push(SyncOperation::Download(download));
                }
                plan.batch.inserts.push(clone);

                plan.operations
                    .push(SyncOperation::Remove(Remove::for_record(record)));
                if record.local_file.is_none() {
                    // Nothing anchors the original any more.
                    plan.batch.deletes.push(record.id);
                    continue;
                }
            }
            (ChangeFlag::Removed, _) => {
                plan.operations
                    .push(SyncOperation::Remove(Remove::for_record(record)));
            }
        }

        if item.is_new {
            plan.batch.inserts.push(item.record);
        } else if item.changed {
            plan.batch.updates.push(item.record);
        }
    }

    debug!(
        inserts = plan.batch.inserts.len(),
        updates = plan.batch.updates.len(),
        deletes = plan.batch.deletes.len(),
        operations = plan.operations.len(),
        conflicts = plan.conflicts,
        is_full = snapshot.is_full,
        "Reconciled"
    );
    plan
}

fn mark_remote_removed(record: &mut FileRecord) -> bool {
    if record.remote_change == ChangeFlag::Removed {
        return false;
    }
    record.remote_change = ChangeFlag::Removed;
    true
}

/// Absorb new remote metadata, escalating to `Modified` unless a change is
/// already pending
fn refresh_remote_facet(
    record: &mut FileRecord,
    entry: &RemoteFileDescriptor,
    replica_missing: bool,
) -> bool {
    let differs = record.remote_title.as_deref() != Some(entry.title.as_str())
        || record.remote_folder.as_deref() != Some(entry.folder.as_str())
        || record.remote_modified_at != entry.modified_at
        || record.remote_hash != entry.hash;

    if !differs && !replica_missing {
        return false;
    }

    let before = record.clone();
    record.remote_title = Some(entry.title.clone());
    record.remote_folder = Some(entry.folder.clone());
    record.remote_modified_at = entry.modified_at;
    record.remote_hash = entry.hash.clone();
    if matches!(record.remote_change, ChangeFlag::None | ChangeFlag::Removed) {
        record.remote_change = ChangeFlag::Modified;
    }
    *record != before
}

fn find_adoptable<'a>(
    record: &FileRecord,
    snapshot: &'a SyncRemoteFiles,
    claimed: &HashSet<String>,
) -> Option<&'a RemoteFileDescriptor> {
    snapshot.iter().find(|entry| {
        !entry.removed
            && !claimed.contains(&entry.remote_id)
            && entry.title == record.title()
            && entry.folder == record.folder()
    })
}

fn adopt(record: &mut FileRecord, entry: &RemoteFileDescriptor) {
    record.remote_id = Some(entry.remote_id.clone());
    record.remote_title = Some(entry.title.clone());
    record.remote_folder = Some(entry.folder.clone());
    record.remote_modified_at = entry.modified_at;
    record.remote_hash = entry.hash.clone();
    record.remote_change = ChangeFlag::Added;
}

/// Move `record`'s remote facet into a new record and detach the original
fn split_remote_facet(record: &mut FileRecord) -> FileRecord {
    let mut clone = FileRecord::new_remote(
        record.account_id,
        record.remote_id.take().unwrap_or_default(),
        record
            .remote_title
            .take()
            .unwrap_or_else(|| record.title().to_string()),
        record
            .remote_folder
            .take()
            .unwrap_or_else(|| record.folder().to_string()),
        record.remote_modified_at.take(),
        record.remote_hash.take(),
    );
    clone.remote_change = ChangeFlag::Added;
    record.remote_change = ChangeFlag::Removed;
    clone
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountId {
        AccountId::new()
    }

    fn synced(account_id: AccountId, remote_id: &str, title: &str, mtime: i64) -> FileRecord {
        let mut record = FileRecord::new_remote(
            account_id,
            remote_id,
            title,
            "/",
            Some(mtime),
            Some(format!("h{}", mtime)),
        );
        record.remote_change = ChangeFlag::None;
        record.local_title = Some(title.to_string());
        record.local_folder = Some("/".to_string());
        record.local_file = Some(format!("{}.psafe3", remote_id));
        record.local_modified_at = Some(mtime);
        record
    }

    fn entry(remote_id: &str, title: &str, mtime: i64) -> RemoteFileDescriptor {
        RemoteFileDescriptor::file(remote_id, title, "/")
            .with_modified_at(mtime)
            .with_hash(format!("h{}", mtime))
    }

    fn full(entries: Vec<RemoteFileDescriptor>) -> SyncRemoteFiles {
        entries
            .into_iter()
            .fold(SyncRemoteFiles::new(Some("c2".to_string()), true), |s, e| {
                s.with_file(e)
            })
    }

    fn kinds(plan: &ReconcilePlan) -> Vec<&'static str> {
        plan.operations.iter().map(|op| op.kind()).collect()
    }

    #[test]
    fn test_converged_record_is_untouched() {
        let acct = account();
        let record = synced(acct, "R1", "a.psafe3", 10);
        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 10)]), &HashSet::new());

        assert!(plan.operations.is_empty());
        assert!(plan.batch.updates.is_empty());
        assert!(plan.batch.inserts.is_empty());
        assert_eq!(plan.batch.cursor, CursorUpdate::Set(Some("c2".to_string())));
    }

    #[test]
    fn test_local_edit_produces_no_operation() {
        let acct = account();
        let mut record = synced(acct, "R1", "a.psafe3", 10);
        record.local_change = ChangeFlag::Modified;

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 10)]), &HashSet::new());
        assert!(plan.operations.is_empty());
    }

    #[test]
    fn test_remote_absent_from_full_listing_is_removed() {
        let acct = account();
        let record = synced(acct, "R1", "a.psafe3", 10);

        let plan = reconcile(acct, &[record.clone()], &full(vec![]), &HashSet::new());

        assert_eq!(plan.batch.updates.len(), 1);
        assert_eq!(plan.batch.updates[0].remote_change, ChangeFlag::Removed);
        assert_eq!(kinds(&plan), vec!["remove"]);
        match &plan.operations[0] {
            SyncOperation::Remove(op) => {
                assert_eq!(op.record_id, record.id);
                assert!(op.remote_id.is_none());
                assert!(op.local_file.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_remote_change_downloads() {
        let acct = account();
        let record = synced(acct, "R1", "a.psafe3", 10);

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 20)]), &HashSet::new());

        assert_eq!(plan.batch.updates[0].remote_change, ChangeFlag::Modified);
        assert_eq!(plan.batch.updates[0].remote_modified_at, Some(20));
        assert_eq!(kinds(&plan), vec!["download"]);
    }

    #[test]
    fn test_missing_replica_triggers_download() {
        let acct = account();
        let record = synced(acct, "R1", "a.psafe3", 10);
        let missing: HashSet<_> = [record.id].into_iter().collect();

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 10)]), &missing);
        assert_eq!(kinds(&plan), vec!["download"]);
    }

    #[test]
    fn test_pending_remote_change_is_not_downgraded() {
        let acct = account();
        let mut record = synced(acct, "R1", "a.psafe3", 10);
        record.remote_change = ChangeFlag::Added;
        record.local_file = None;

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "b.psafe3", 30)]), &HashSet::new());
        assert_eq!(plan.batch.updates[0].remote_change, ChangeFlag::Added);
        assert_eq!(plan.batch.updates[0].remote_title.as_deref(), Some("b.psafe3"));
    }

    #[test]
    fn test_new_remote_file_is_discovered() {
        let acct = account();
        let plan = reconcile(acct, &[], &full(vec![entry("R2", "new.psafe3", 5)]), &HashSet::new());

        assert_eq!(plan.batch.inserts.len(), 1);
        let inserted = &plan.batch.inserts[0];
        assert_eq!(inserted.remote_id.as_deref(), Some("R2"));
        assert_eq!(inserted.remote_change, ChangeFlag::Added);
        assert!(inserted.local_file.is_none());
        assert_eq!(kinds(&plan), vec!["download"]);
        assert_eq!(plan.operations[0].record_id(), inserted.id);
    }

    #[test]
    fn test_conflict_split_keeps_remote_edit() {
        let acct = account();
        let mut record = synced(acct, "R1", "a.psafe3", 10);
        record.local_change = ChangeFlag::Removed;

        let plan = reconcile(acct, &[record.clone()], &full(vec![entry("R1", "a.psafe3", 20)]), &HashSet::new());

        assert_eq!(plan.conflicts, 1);
        assert_eq!(plan.batch.inserts.len(), 1);
        let clone = &plan.batch.inserts[0];
        assert_ne!(clone.id, record.id);
        assert_eq!(clone.remote_id.as_deref(), Some("R1"));
        assert_eq!(clone.remote_modified_at, Some(20));

        let original = &plan.batch.updates[0];
        assert_eq!(original.id, record.id);
        assert!(original.remote_id.is_none());
        assert_eq!(original.remote_change, ChangeFlag::Removed);

        let downloads: Vec<_> = plan.operations_for(&clone.id);
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].kind(), "download");

        let removes = plan.operations_for(&record.id);
        assert_eq!(removes.len(), 1);
        match removes[0] {
            SyncOperation::Remove(op) => assert!(op.remote_id.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_split_of_unanchored_original_deletes_it() {
        let acct = account();
        let mut record = FileRecord::new_remote(acct, "R1", "a.psafe3", "/", Some(10), None);
        record.local_change = ChangeFlag::Removed;

        let plan = reconcile(acct, &[record.clone()], &full(vec![entry("R1", "a.psafe3", 20)]), &HashSet::new());

        assert_eq!(plan.batch.deletes, vec![record.id]);
        assert!(plan.batch.updates.is_empty());
        assert_eq!(plan.batch.inserts.len(), 1);
        assert_eq!(plan.operations.len(), 2);
        for record in plan.batch.inserts.iter().chain(plan.batch.updates.iter()) {
            assert!(record.validate().is_ok());
        }
    }

    #[test]
    fn test_local_delete_without_remote_change_removes_both() {
        let acct = account();
        let mut record = synced(acct, "R1", "a.psafe3", 10);
        record.local_change = ChangeFlag::Removed;

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 10)]), &HashSet::new());

        assert_eq!(kinds(&plan), vec!["remove"]);
        match &plan.operations[0] {
            SyncOperation::Remove(op) => assert_eq!(op.remote_id.as_deref(), Some("R1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_adopts_same_named_remote_file() {
        let acct = account();
        let record = FileRecord::new_local(acct, "a.psafe3", "/", "local.psafe3", 10);

        let plan = reconcile(acct, &[record.clone()], &full(vec![entry("R9", "a.psafe3", 20)]), &HashSet::new());

        assert!(plan.batch.inserts.is_empty());
        assert_eq!(plan.batch.updates.len(), 1);
        assert_eq!(plan.batch.updates[0].remote_id.as_deref(), Some("R9"));
        assert!(plan.operations.is_empty());
    }

    #[test]
    fn test_adoption_requires_same_folder() {
        let acct = account();
        let record = FileRecord::new_local(acct, "a.psafe3", "/Other", "local.psafe3", 10);

        let plan = reconcile(acct, &[record], &full(vec![entry("R9", "a.psafe3", 20)]), &HashSet::new());

        assert!(plan.batch.updates.is_empty());
        assert_eq!(plan.batch.inserts.len(), 1);
    }

    #[test]
    fn test_incremental_listing_leaves_others_alone() {
        let acct = account();
        let stale = synced(acct, "R1", "a.psafe3", 10);
        let also_stale = synced(acct, "R2", "b.psafe3", 10);
        let target = synced(acct, "R3", "c.psafe3", 10);
        let snapshot = SyncRemoteFiles::new(Some("c9".to_string()), false)
            .with_file(entry("R3", "c.psafe3", 99));

        let plan = reconcile(acct, &[stale, also_stale, target.clone()], &snapshot, &HashSet::new());

        assert_eq!(plan.batch.updates.len(), 1);
        assert_eq!(plan.batch.updates[0].id, target.id);
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].record_id(), target.id);
    }

    #[test]
    fn test_incremental_removal_marker() {
        let acct = account();
        let record = synced(acct, "R1", "a.psafe3", 10);
        let snapshot = SyncRemoteFiles::new(None, false).with_file(RemoteFileDescriptor::removed("R1"));

        let plan = reconcile(acct, &[record], &snapshot, &HashSet::new());
        assert_eq!(plan.batch.updates[0].remote_change, ChangeFlag::Removed);
        assert_eq!(kinds(&plan), vec!["remove"]);
    }

    #[test]
    fn test_deleted_local_replica_does_not_resurrect() {
        let acct = account();
        let mut record = FileRecord::new_remote(acct, "R1", "a.psafe3", "/", Some(10), Some("h10".to_string()));
        record.remote_change = ChangeFlag::None;
        record.local_change = ChangeFlag::Removed;
        record.local_title = Some("a.psafe3".to_string());

        let plan = reconcile(acct, &[record], &full(vec![entry("R1", "a.psafe3", 10)]), &HashSet::new());

        assert_eq!(plan.conflicts, 0);
        assert_eq!(kinds(&plan), vec!["remove"]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let acct = account();
        let mut deleted = synced(acct, "R1", "a.psafe3", 10);
        deleted.local_change = ChangeFlag::Removed;
        let stale = synced(acct, "R2", "b.psafe3", 10);
        let snapshot = full(vec![
            entry("R1", "a.psafe3", 20),
            entry("R2", "b.psafe3", 30),
            entry("R3", "c.psafe3", 5),
        ]);

        let first = reconcile(acct, &[deleted.clone(), stale.clone()], &snapshot, &HashSet::new());

        // Persist the first plan's batch as the ledger would
        let mut records: Vec<FileRecord> = vec![deleted, stale];
        for update in &first.batch.updates {
            if let Some(slot) = records.iter_mut().find(|r| r.id == update.id) {
                *slot = update.clone();
            }
        }
        records.retain(|r| !first.batch.deletes.contains(&r.id));
        records.extend(first.batch.inserts.iter().cloned());

        let second = reconcile(acct, &records, &snapshot, &HashSet::new());

        let downloads = |plan: &ReconcilePlan| {
            let mut ids: Vec<String> = plan
                .operations
                .iter()
                .filter_map(|op| match op {
                    SyncOperation::Download(d) => Some(d.remote_id.clone()),
                    _ => None,
                })
                .collect();
            ids.sort();
            ids
        };
        assert_eq!(downloads(&first), downloads(&second));
        assert_eq!(first.operations.len(), second.operations.len());
        assert!(second.batch.inserts.is_empty());
        assert_eq!(second.conflicts, 0);
    }
}

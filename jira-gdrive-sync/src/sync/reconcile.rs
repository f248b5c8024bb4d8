use tracing::{info, warn};

use super::model::{RemoteItem, SourceItem, SyncDecision, TargetLayout};
use super::paths::PathError;

/// Diffs the tracker listing against the remote tree.
///
/// A remote file matches a source item when both the name and the target
/// directory agree. Matched items are re-uploaded only when the source is
/// strictly newer; unmatched remote files are deleted and unmatched source
/// items are uploaded into folders that may not exist yet. When several
/// remote copies match one source item, the newest stays and the rest are
/// deleted.
pub fn reconcile(
    source: &[SourceItem],
    remote: &[RemoteItem],
    layout: &TargetLayout,
) -> Result<SyncDecision, PathError> {
    let targets: Vec<String> = source.iter().map(|item| layout.target_dir(item)).collect();
    let mut kept: Vec<Option<&RemoteItem>> = vec![None; source.len()];
    let mut decision = SyncDecision::default();

    for remote_item in remote.iter().filter(|item| !item.is_folder) {
        let hit = source
            .iter()
            .zip(&targets)
            .position(|(item, target)| item.name == remote_item.name && *target == remote_item.path);
        let Some(index) = hit else {
            decision.to_delete.push(remote_item.clone());
            continue;
        };
        let Some(current) = kept[index] else {
            kept[index] = Some(remote_item);
            continue;
        };
        warn!(path = %remote_item.path, name = %remote_item.name, "duplicate remote file name");
        let loser = if remote_item.modified_at > current.modified_at {
            kept[index] = Some(remote_item);
            current
        } else {
            remote_item
        };
        decision.to_delete.push(loser.clone());
    }

    for ((item, target), remote_copy) in source.iter().zip(targets).zip(kept) {
        match remote_copy {
            Some(copy) if item.created_at > copy.modified_at => {
                decision.to_upload.push(layout.transfer_for(item)?);
            }
            Some(_) => {}
            None => {
                decision.to_upload.push(layout.transfer_for(item)?);
                decision.paths_to_create.insert(target);
            }
        }
    }

    info!(
        upload = decision.to_upload.len(),
        delete = decision.to_delete.len(),
        create = decision.paths_to_create.len(),
        "reconciled"
    );
    Ok(decision)
}

use super::Outcome;
use crate::error::TransferError;
use crate::store::ObjectStore;
use crate::types::WorkUnit;
use tracing::debug;

/// Delete the unit's source; an already absent object counts as done
pub(super) async fn delete(store: &dyn ObjectStore, unit: &WorkUnit) -> Result<Outcome, TransferError> {
    let source = unit.source_locator()?;
    let existed = store.exists(&source).await?;
    if existed {
        store.delete(&source).await?;
    }
    debug!(unit_id = %unit.id, existed, "Deleted object");
    Ok(Outcome::Deleted { existed })
}

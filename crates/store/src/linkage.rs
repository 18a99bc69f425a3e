//! Lead ↔ call linkage
//!
//! A call is linked to a lead exactly once, triggered by the first
//! transcript seen for the call. Failures here are logged and swallowed:
//! linkage is best-effort and must never take a live bridge session down.

use crate::calls::CallEventStore;
use crate::leads::LeadStore;
use crate::StoreError;

/// Link the lead that was called to the call SID, if not already linked.
///
/// Resolution order:
/// 1. A lead already holding this SID means nothing to do.
/// 2. Otherwise the call event's `to_number` is looked up and the most
///    recent lead with that phone and no call SID claims it.
///
/// Returns the linked lead id when a new link was made.
pub async fn link_lead(
    leads: &dyn LeadStore,
    calls: &dyn CallEventStore,
    call_sid: &str,
) -> Option<String> {
    match try_link(leads, calls, call_sid).await {
        Ok(linked) => linked,
        Err(StoreError::DuplicateCallSid { call_sid }) => {
            // Two leads racing for one SID violates the linkage invariant;
            // the write was rejected and an operator has to look.
            tracing::error!(call_sid = %call_sid, "Duplicate call SID linkage rejected");
            None
        }
        Err(e) => {
            tracing::warn!(call_sid = %call_sid, error = %e, "Lead linkage failed");
            None
        }
    }
}

async fn try_link(
    leads: &dyn LeadStore,
    calls: &dyn CallEventStore,
    call_sid: &str,
) -> Result<Option<String>, StoreError> {
    if leads.find_by_call_sid(call_sid).await?.is_some() {
        return Ok(None);
    }

    let Some(event) = calls.get(call_sid).await? else {
        tracing::debug!(call_sid = %call_sid, "No call event yet, skipping linkage");
        return Ok(None);
    };
    let Some(to_number) = event.to_number.filter(|n| !n.is_empty()) else {
        tracing::debug!(call_sid = %call_sid, "Call event has no to_number, skipping linkage");
        return Ok(None);
    };

    let Some(lead) = leads.find_latest_unlinked_by_phone(&to_number).await? else {
        return Ok(None);
    };

    leads.assign_call_sid(&lead.id, call_sid).await?;
    tracing::info!(call_sid = %call_sid, lead_id = %lead.id, "Lead linked to call");

    Ok(Some(lead.id))
}

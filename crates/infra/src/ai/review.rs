//! Review-and-approve staging for AI suggestions.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{info, warn};

use prepforge_ai::{AiError, ApplyReport, Suggestion, SuggestionApplier};
use prepforge_core::{RecordId, SuggestionId};

use crate::jobs::guard::lock;

/// Suggestions waiting for a human decision.
///
/// Batch runs append to it; a reviewer toggles selection; `apply_selected`
/// commits the selected subset through a [`SuggestionApplier`]. Nothing is
/// applied without going through here.
#[derive(Debug, Default)]
pub struct ReviewStaging {
    inner: Mutex<Vec<Suggestion>>,
}

impl ReviewStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, suggestions: impl IntoIterator<Item = Suggestion>) {
        lock(&self.inner).extend(suggestions);
    }

    pub fn all(&self) -> Vec<Suggestion> {
        lock(&self.inner).clone()
    }

    pub fn for_record(&self, record_id: RecordId) -> Vec<Suggestion> {
        lock(&self.inner)
            .iter()
            .filter(|s| s.record_id == record_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Flip the selection of one suggestion. Returns the new state, or `None`
    /// if no such suggestion is staged.
    pub fn toggle(&self, id: SuggestionId) -> Option<bool> {
        let mut staged = lock(&self.inner);
        let suggestion = staged.iter_mut().find(|s| s.id == id)?;
        suggestion.selected = !suggestion.selected;
        Some(suggestion.selected)
    }

    pub fn set_all_selected(&self, selected: bool) {
        for suggestion in lock(&self.inner).iter_mut() {
            suggestion.selected = selected;
        }
    }

    pub fn selected(&self) -> Vec<Suggestion> {
        lock(&self.inner)
            .iter()
            .filter(|s| s.selected)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }

    /// Commit the selected suggestions in one bulk call.
    ///
    /// On success the selected suggestions leave the staging list, except the
    /// ones the report names in `failed`, which stay staged and selected. A
    /// failure the applier does not attribute to a suggestion cannot be kept
    /// back and is only logged. If the call itself fails the list is left
    /// exactly as it was so the reviewer can retry.
    pub async fn apply_selected<A>(&self, applier: &A) -> Result<ApplyReport, AiError>
    where
        A: SuggestionApplier + ?Sized,
    {
        let selected = self.selected();
        if selected.is_empty() {
            return Ok(ApplyReport::default());
        }

        let report = match applier.apply(&selected).await {
            Ok(report) => report,
            Err(err) => {
                warn!(selected = selected.len(), error = %err, "applying suggestions failed");
                return Err(err);
            }
        };

        let failed: HashSet<SuggestionId> = report.failed.iter().copied().collect();
        let applied: HashSet<SuggestionId> = selected
            .iter()
            .map(|s| s.id)
            .filter(|id| !failed.contains(id))
            .collect();
        lock(&self.inner).retain(|s| !applied.contains(&s.id));

        if report.error_count > failed.len() {
            warn!(
                error_count = report.error_count,
                attributed = failed.len(),
                "some suggestions failed to apply but were not identified"
            );
        }
        info!(
            applied = applied.len(),
            success_count = report.success_count,
            error_count = report.error_count,
            "suggestions applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::TestApplier;
    use prepforge_ai::ProposedChange;
    use serde_json::json;

    fn staged(count: usize) -> (ReviewStaging, Vec<SuggestionId>) {
        let staging = ReviewStaging::new();
        let suggestions: Vec<_> = (0..count)
            .map(|n| {
                Suggestion::from_proposal(
                    RecordId::new(),
                    ProposedChange::new().with_change("explanation", json!(format!("v{n}"))),
                )
            })
            .collect();
        let ids = suggestions.iter().map(|s| s.id).collect();
        staging.extend(suggestions);
        (staging, ids)
    }

    #[test]
    fn toggle_flips_selection() {
        let (staging, ids) = staged(2);

        assert_eq!(staging.toggle(ids[0]), Some(false));
        assert_eq!(staging.selected().len(), 1);
        assert_eq!(staging.toggle(ids[0]), Some(true));
        assert_eq!(staging.toggle(SuggestionId::new()), None);
    }

    #[tokio::test]
    async fn applies_only_the_selected_subset() {
        let (staging, ids) = staged(3);
        staging.toggle(ids[1]);
        let applier = TestApplier::default();

        let report = staging.apply_selected(&applier).await.unwrap();

        assert_eq!(report.success_count, 2);
        assert_eq!(applier.applied(), vec![ids[0], ids[2]]);
        let remaining: Vec<_> = staging.all().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![ids[1]]);
    }

    #[tokio::test]
    async fn failed_apply_keeps_staging_intact() {
        let (staging, _) = staged(2);
        let applier = TestApplier::failing(AiError::Unavailable("offline".into()));

        let err = staging.apply_selected(&applier).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(staging.len(), 2);
        assert_eq!(staging.selected().len(), 2);
    }

    #[tokio::test]
    async fn suggestions_that_failed_to_apply_stay_staged() {
        let (staging, ids) = staged(3);
        let applier = TestApplier::rejecting(vec![ids[1]]);

        let report = staging.apply_selected(&applier).await.unwrap();

        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);
        assert_eq!(applier.applied(), vec![ids[0], ids[2]]);
        let remaining: Vec<_> = staging.selected().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![ids[1]]);
    }

    #[tokio::test]
    async fn unattributed_failures_still_leave_staging() {
        let (staging, _) = staged(2);
        let applier = TestApplier::with_unattributed_errors(1);

        let report = staging.apply_selected(&applier).await.unwrap();

        assert_eq!(report.error_count, 1);
        assert!(report.failed.is_empty());
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn nothing_selected_makes_no_call() {
        let (staging, _) = staged(2);
        staging.set_all_selected(false);
        let applier = TestApplier::failing(AiError::Internal("must not be called".into()));

        let report = staging.apply_selected(&applier).await.unwrap();

        assert_eq!(report, ApplyReport::default());
        assert_eq!(staging.len(), 2);
    }
}

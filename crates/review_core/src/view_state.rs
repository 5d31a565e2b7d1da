//! Page-lifetime cache of the last fetched abstracts, their summaries and the
//! live bindings of every open detail view.

use std::collections::{BTreeMap, HashMap, HashSet};

use shared::domain::{Abstract, AbstractId, Comment, Email, Slot};
use tracing::warn;

use crate::aggregate::{aggregate, AggregateConfig, ExportTable, Summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentFormState {
    #[default]
    Enabled,
    Disabled,
}

/// Live state of one open detail view: the score controls, the comment form
/// and the navigation targets.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetBinding {
    pub abstract_id: AbstractId,
    /// Bumped on every registration; lets late completions detect that the
    /// view they were started for has since been rebuilt.
    pub generation: u64,
    pub comment_draft: String,
    pub comment_form: CommentFormState,
    /// Most recent first.
    pub comments: Vec<Comment>,
    /// Slider values released but not yet posted (batched score mode).
    pub pending_scores: BTreeMap<Slot, f64>,
    /// Values already pushed back into the overview row cells.
    pub confirmed_scores: BTreeMap<Slot, f64>,
    pub prev: Option<AbstractId>,
    pub next: Option<AbstractId>,
}

impl WidgetBinding {
    pub fn new(abstract_id: AbstractId) -> Self {
        Self {
            abstract_id,
            generation: 0,
            comment_draft: String::new(),
            comment_form: CommentFormState::Enabled,
            comments: Vec::new(),
            pending_scores: BTreeMap::new(),
            confirmed_scores: BTreeMap::new(),
            prev: None,
            next: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverviewTotals {
    pub total: usize,
    pub scored_by_current_user: usize,
}

#[derive(Debug, Default)]
pub struct ViewStateStore {
    abstracts: Vec<Abstract>,
    summaries: Vec<Summary>,
    positions: HashMap<AbstractId, usize>,
    totals: OverviewTotals,
    export: ExportTable,
    open_modals: HashMap<AbstractId, WidgetBinding>,
    pending_delete: Option<AbstractId>,
    admins: HashSet<Email>,
    next_generation: u64,
}

impl ViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every summary from `abstracts` and swaps the lists in one
    /// step. A repeated id keeps only its first occurrence.
    pub fn replace(&mut self, abstracts: Vec<Abstract>, current_user: &Email, config: &AggregateConfig) {
        let mut seen = HashSet::new();
        let abstracts: Vec<Abstract> = abstracts
            .into_iter()
            .filter(|item| match item.assigned_id() {
                Some(id) => {
                    let first = seen.insert(id.clone());
                    if !first {
                        warn!(abstract_id = %id, "dropping duplicate abstract from fetch");
                    }
                    first
                }
                None => true,
            })
            .collect();

        let computed = aggregate(&abstracts, current_user, config);
        let positions: HashMap<AbstractId, usize> = computed
            .summaries
            .iter()
            .enumerate()
            .filter_map(|(index, summary)| {
                summary
                    .id
                    .as_ref()
                    .filter(|id| id.is_assigned())
                    .map(|id| (id.clone(), index))
            })
            .collect();

        self.abstracts = abstracts;
        self.summaries = computed.summaries;
        self.positions = positions;
        self.totals = OverviewTotals {
            total: computed.total,
            scored_by_current_user: computed.scored_by_current_user,
        };
        self.export = computed.export;
        self.forget_missing_modals();
    }

    /// Drops all rows. Open bindings are forgotten first so none outlives the
    /// rows it was built for.
    pub fn clear(&mut self) -> Vec<WidgetBinding> {
        let forgotten = self.forget_all_modals();
        self.abstracts.clear();
        self.summaries.clear();
        self.positions.clear();
        self.totals = OverviewTotals::default();
        self.export = ExportTable::default();
        forgotten
    }

    pub fn abstracts(&self) -> &[Abstract] {
        &self.abstracts
    }

    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    pub fn summary(&self, id: &AbstractId) -> Option<&Summary> {
        self.positions.get(id).map(|index| &self.summaries[*index])
    }

    pub fn abstract_by_id(&self, id: &AbstractId) -> Option<&Abstract> {
        self.positions.get(id).map(|index| &self.abstracts[*index])
    }

    pub fn contains(&self, id: &AbstractId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn totals(&self) -> OverviewTotals {
        self.totals
    }

    pub fn export(&self) -> &ExportTable {
        &self.export
    }

    /// Previous and next addressable abstract in overview order. Rows
    /// without a usable id are stepped over.
    pub fn neighbours(&self, id: &AbstractId) -> (Option<AbstractId>, Option<AbstractId>) {
        let Some(index) = self.positions.get(id).copied() else {
            return (None, None);
        };
        let addressable = |summary: &Summary| summary.id.clone().filter(AbstractId::is_assigned);
        let prev = self.summaries[..index].iter().rev().find_map(addressable);
        let next = self.summaries[index + 1..].iter().find_map(addressable);
        (prev, next)
    }

    pub fn get_open_modal(&self, id: &AbstractId) -> Option<&WidgetBinding> {
        self.open_modals.get(id)
    }

    pub fn get_open_modal_mut(&mut self, id: &AbstractId) -> Option<&mut WidgetBinding> {
        self.open_modals.get_mut(id)
    }

    /// Registers `binding` for its abstract. At most one binding exists per
    /// id: an earlier one is torn down and returned to the caller.
    pub fn register_modal(&mut self, mut binding: WidgetBinding) -> (u64, Option<WidgetBinding>) {
        self.next_generation += 1;
        binding.generation = self.next_generation;
        let (prev, next) = self.neighbours(&binding.abstract_id);
        binding.prev = prev;
        binding.next = next;
        let generation = binding.generation;
        let stale = self.open_modals.insert(binding.abstract_id.clone(), binding);
        (generation, stale)
    }

    pub fn forget_modal(&mut self, id: &AbstractId) -> Option<WidgetBinding> {
        self.open_modals.remove(id)
    }

    pub fn forget_all_modals(&mut self) -> Vec<WidgetBinding> {
        self.open_modals.drain().map(|(_, binding)| binding).collect()
    }

    pub fn open_modal_ids(&self) -> Vec<AbstractId> {
        let mut ids: Vec<AbstractId> = self.open_modals.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_current(&self, id: &AbstractId, generation: u64) -> bool {
        self.open_modals
            .get(id)
            .is_some_and(|binding| binding.generation == generation)
    }

    pub fn set_pending_delete(&mut self, id: AbstractId) {
        self.pending_delete = Some(id);
    }

    pub fn pending_delete(&self) -> Option<&AbstractId> {
        self.pending_delete.as_ref()
    }

    pub fn take_pending_delete(&mut self) -> Option<AbstractId> {
        self.pending_delete.take()
    }

    pub fn set_admins(&mut self, admins: Vec<Email>) {
        self.admins = admins.into_iter().collect();
    }

    /// Only gates optional affordances; the backend enforces authorization.
    pub fn is_admin(&self, email: &Email) -> bool {
        self.admins.contains(email)
    }

    fn forget_missing_modals(&mut self) {
        let positions = &self.positions;
        self.open_modals.retain(|id, _| {
            let keep = positions.contains_key(id);
            if !keep {
                warn!(abstract_id = %id, "forgetting detail view for abstract no longer listed");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(ids: &[&str]) -> Vec<Abstract> {
        ids.iter()
            .map(|id| Abstract {
                id: Some(AbstractId::from(*id)),
                title: format!("talk {id}"),
                ..Abstract::default()
            })
            .collect()
    }

    fn reviewer() -> Email {
        Email::from("r@y.com")
    }

    #[test]
    fn replace_twice_keeps_one_summary_per_id() {
        let mut store = ViewStateStore::new();
        let config = AggregateConfig::default();

        for _ in 0..2 {
            store.replace(listed(&["X", "Y", "Z"]), &reviewer(), &config);
            assert_eq!(store.summaries().len(), store.abstracts().len());
            assert_eq!(store.summaries().len(), 3);
            for id in ["X", "Y", "Z"] {
                let id = AbstractId::from(id);
                assert_eq!(
                    store
                        .summaries()
                        .iter()
                        .filter(|s| s.id.as_ref() == Some(&id))
                        .count(),
                    1
                );
                assert_eq!(store.summary(&id).and_then(|s| s.id.clone()), Some(id));
            }
        }
    }

    #[test]
    fn replace_drops_repeated_ids() {
        let mut store = ViewStateStore::new();
        store.replace(listed(&["X", "X", "Y"]), &reviewer(), &AggregateConfig::default());

        assert_eq!(store.summaries().len(), 2);
        assert_eq!(store.abstracts().len(), 2);
        assert_eq!(store.totals().total, 2);
        assert_eq!(store.export().rows.len(), 2);
    }

    #[test]
    fn register_modal_replaces_instead_of_duplicating() {
        let mut store = ViewStateStore::new();
        store.replace(listed(&["X", "Y"]), &reviewer(), &AggregateConfig::default());

        let id = AbstractId::from("X");
        let (first, stale) = store.register_modal(WidgetBinding::new(id.clone()));
        assert!(stale.is_none());
        let (second, stale) = store.register_modal(WidgetBinding::new(id.clone()));
        assert_eq!(stale.map(|b| b.generation), Some(first));

        assert_eq!(store.open_modal_ids(), vec![id.clone()]);
        assert!(store.is_current(&id, second));
        assert!(!store.is_current(&id, first));
        assert_eq!(
            store.get_open_modal(&id).and_then(|b| b.next.clone()),
            Some(AbstractId::from("Y"))
        );
    }

    #[test]
    fn clear_forgets_bindings_before_rows() {
        let mut store = ViewStateStore::new();
        store.replace(listed(&["X"]), &reviewer(), &AggregateConfig::default());
        store.register_modal(WidgetBinding::new(AbstractId::from("X")));

        let forgotten = store.clear();
        assert_eq!(forgotten.len(), 1);
        assert!(store.open_modal_ids().is_empty());
        assert!(store.summaries().is_empty());
        assert_eq!(store.totals(), OverviewTotals::default());
    }

    #[test]
    fn replace_forgets_bindings_for_vanished_abstracts() {
        let mut store = ViewStateStore::new();
        let config = AggregateConfig::default();
        store.replace(listed(&["X", "Y"]), &reviewer(), &config);
        store.register_modal(WidgetBinding::new(AbstractId::from("X")));
        store.register_modal(WidgetBinding::new(AbstractId::from("Y")));

        store.replace(listed(&["Y"]), &reviewer(), &config);
        assert_eq!(store.open_modal_ids(), vec![AbstractId::from("Y")]);
    }

    #[test]
    fn neighbours_stop_at_the_ends() {
        let mut store = ViewStateStore::new();
        store.replace(listed(&["X", "Y", "Z"]), &reviewer(), &AggregateConfig::default());

        assert_eq!(
            store.neighbours(&AbstractId::from("X")),
            (None, Some(AbstractId::from("Y")))
        );
        assert_eq!(
            store.neighbours(&AbstractId::from("Z")),
            (Some(AbstractId::from("Y")), None)
        );
        assert_eq!(store.neighbours(&AbstractId::from("missing")), (None, None));
    }

    #[test]
    fn neighbours_step_over_unsaved_rows() {
        let mut store = ViewStateStore::new();
        let mut abstracts = listed(&["X"]);
        abstracts.push(Abstract {
            id: None,
            title: "draft".into(),
            ..Abstract::default()
        });
        abstracts.extend(listed(&["", "Y"]));
        store.replace(abstracts, &reviewer(), &AggregateConfig::default());
        assert_eq!(store.summaries().len(), 4);

        assert_eq!(
            store.neighbours(&AbstractId::from("X")),
            (None, Some(AbstractId::from("Y")))
        );
        assert_eq!(
            store.neighbours(&AbstractId::from("Y")),
            (Some(AbstractId::from("X")), None)
        );
    }

    #[test]
    fn admin_list_only_answers_membership() {
        let mut store = ViewStateStore::new();
        store.set_admins(vec![Email::from("boss@x.com")]);
        assert!(store.is_admin(&Email::from("boss@x.com")));
        assert!(!store.is_admin(&reviewer()));
    }
}

//! Model switching state machine.
//!
//! Every `select_model` intent opens a transition tagged with a token. Network
//! results are applied only while their token is the latest one, which is how a
//! newer selection suppresses the effects of an older one still in flight.
//! Models with an unload still in flight are tracked separately, so a load of
//! the same model is never issued before that unload has returned.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    #[default]
    NoModel,
    Unloading { previous: String, next: String },
    Loading(String),
    Active(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub token: u64,
    pub target: String,
    /// Model to unload before loading `target`.
    pub unload: Option<String>,
}

#[derive(Debug, Default)]
pub struct ModelLifecycle {
    phase: LifecyclePhase,
    latest: u64,
    unloading: HashSet<String>,
}

impl ModelLifecycle {
    #[cfg(test)]
    pub fn phase(&self) -> &LifecyclePhase {
        &self.phase
    }

    pub fn active(&self) -> Option<&str> {
        match &self.phase {
            LifecyclePhase::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Target of the transition in flight, if any.
    pub fn pending(&self) -> Option<&str> {
        match &self.phase {
            LifecyclePhase::Unloading { next, .. } | LifecyclePhase::Loading(next) => Some(next),
            _ => None,
        }
    }

    /// Starts a switch to `target`. Returns `None` when `target` is already
    /// active or is the target of the transition in flight.
    pub fn begin(&mut self, target: &str) -> Option<Transition> {
        if self.active() == Some(target) || self.pending() == Some(target) {
            return None;
        }
        self.latest += 1;
        let unload = self.active().map(str::to_string);
        if let Some(previous) = &unload {
            self.unloading.insert(previous.clone());
        }
        self.phase = match &unload {
            Some(previous) => {
                LifecyclePhase::Unloading { previous: previous.clone(), next: target.to_string() }
            }
            None => LifecyclePhase::Loading(target.to_string()),
        };
        Some(Transition { token: self.latest, target: target.to_string(), unload })
    }

    pub fn is_current(&self, token: u64) -> bool {
        token == self.latest
    }

    /// Whether an unload of `id` was issued and has not returned yet.
    pub fn is_unloading(&self, id: &str) -> bool {
        self.unloading.contains(id)
    }

    /// Records an unload issued outside a transition, e.g. undoing a late load.
    pub fn unload_started(&mut self, id: &str) {
        self.unloading.insert(id.to_string());
    }

    /// The backend answered (or the call timed out) for an unload of `id`.
    pub fn unload_returned(&mut self, id: &str) {
        self.unloading.remove(id);
    }

    /// The unload step finished (successfully or not). Returns false when the
    /// transition was superseded and must not go on to load.
    pub fn unload_finished(&mut self, token: u64) -> bool {
        if !self.is_current(token) {
            return false;
        }
        if let LifecyclePhase::Unloading { next, .. } = &self.phase {
            self.phase = LifecyclePhase::Loading(next.clone());
        }
        true
    }

    pub fn complete(&mut self, token: u64) -> bool {
        if !self.is_current(token) {
            return false;
        }
        match &self.phase {
            LifecyclePhase::Loading(next) => {
                self.phase = LifecyclePhase::Active(next.clone());
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self, token: u64) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.phase = LifecyclePhase::NoModel;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_selection_loads_without_unload() {
        let mut lifecycle = ModelLifecycle::default();
        let t = lifecycle.begin("m1").unwrap();
        assert_eq!(t.unload, None);
        assert_eq!(lifecycle.pending(), Some("m1"));
        assert!(lifecycle.complete(t.token));
        assert_eq!(lifecycle.active(), Some("m1"));
    }

    #[test]
    fn switching_unloads_previous_first() {
        let mut lifecycle = ModelLifecycle::default();
        let first = lifecycle.begin("m1").unwrap();
        lifecycle.complete(first.token);

        let second = lifecycle.begin("m2").unwrap();
        assert_eq!(second.unload.as_deref(), Some("m1"));
        assert_eq!(
            lifecycle.phase(),
            &LifecyclePhase::Unloading { previous: "m1".into(), next: "m2".into() }
        );
        assert!(lifecycle.unload_finished(second.token));
        assert_eq!(lifecycle.phase(), &LifecyclePhase::Loading("m2".into()));
        assert!(lifecycle.complete(second.token));
        assert_eq!(lifecycle.active(), Some("m2"));
    }

    #[test]
    fn reselecting_active_model_is_a_noop() {
        let mut lifecycle = ModelLifecycle::default();
        let t = lifecycle.begin("m1").unwrap();
        lifecycle.complete(t.token);
        assert!(lifecycle.begin("m1").is_none());
    }

    #[test]
    fn late_result_of_superseded_selection_is_ignored() {
        let mut lifecycle = ModelLifecycle::default();
        let a = lifecycle.begin("a").unwrap();
        let b = lifecycle.begin("b").unwrap();
        assert_eq!(b.unload, None);

        assert!(lifecycle.complete(b.token));
        assert!(!lifecycle.complete(a.token));
        assert!(!lifecycle.fail(a.token));
        assert_eq!(lifecycle.active(), Some("b"));
    }

    #[test]
    fn superseded_unload_does_not_continue() {
        let mut lifecycle = ModelLifecycle::default();
        let first = lifecycle.begin("m1").unwrap();
        lifecycle.complete(first.token);
        let to_m2 = lifecycle.begin("m2").unwrap();
        let to_m3 = lifecycle.begin("m3").unwrap();

        assert!(!lifecycle.unload_finished(to_m2.token));
        assert_eq!(lifecycle.pending(), Some("m3"));
        assert!(lifecycle.complete(to_m3.token));
    }

    #[test]
    fn reselecting_pending_target_is_a_noop() {
        let mut lifecycle = ModelLifecycle::default();
        let first = lifecycle.begin("a").unwrap();
        assert!(lifecycle.begin("a").is_none());
        assert!(lifecycle.complete(first.token));

        let switch = lifecycle.begin("b").unwrap();
        assert!(lifecycle.begin("b").is_none());
        assert!(lifecycle.is_current(switch.token));
    }

    #[test]
    fn unload_in_flight_is_tracked_until_returned() {
        let mut lifecycle = ModelLifecycle::default();
        let first = lifecycle.begin("p").unwrap();
        lifecycle.complete(first.token);

        let to_a = lifecycle.begin("a").unwrap();
        assert!(lifecycle.is_unloading("p"));
        let back = lifecycle.begin("p").unwrap();
        assert_eq!(back.unload, None);

        lifecycle.unload_returned("p");
        assert!(!lifecycle.is_unloading("p"));
        assert!(!lifecycle.unload_finished(to_a.token));
        assert!(lifecycle.complete(back.token));
        assert_eq!(lifecycle.active(), Some("p"));
    }

    #[test]
    fn failure_collapses_to_no_model() {
        let mut lifecycle = ModelLifecycle::default();
        let t = lifecycle.begin("m1").unwrap();
        assert!(lifecycle.fail(t.token));
        assert_eq!(lifecycle.phase(), &LifecyclePhase::NoModel);
        assert_eq!(lifecycle.active(), None);
    }
}

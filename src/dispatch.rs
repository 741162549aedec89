//! Completion and dispatch protocol (spec §4.F): decides when a view is
//! `Partial`/`Full`, and fires the exactly-once `FirstFull` plus repeatable
//! `Full`/`Partial` publish notifications.

use crate::config::Config;
use std::collections::HashSet;

/// A store-view's lifecycle state, derived from the active clients and what
/// they've sent. `Unused`/`Unknown` never publish; completion only
/// distinguishes `Partial` from `Full` (spec §9: represented explicitly
/// rather than as a bag of boolean flags, so the transition table is
/// testable in isolation from networking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Unused,
    Unknown,
    Partial,
    Full,
}

/// What caused a completion check to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    TableEnd,
    ClientDisconnect,
    WindowExceeded,
    TimeoutExpired,
}

impl CompletionTrigger {
    /// `WindowExceeded`/`TimeoutExpired` force the view to `Full` (treat
    /// whatever we have as final) and the view is removed after dispatch.
    fn forces_full_and_removal(&self) -> bool {
        matches!(
            self,
            CompletionTrigger::WindowExceeded | CompletionTrigger::TimeoutExpired
        )
    }
}

/// Per-state `(modified, sent)` pair: has something relevant changed since
/// we last sent to this interest class, and have we ever sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchFlags {
    pub modified: bool,
    pub sent: bool,
}

/// The publish interest mask a dispatch decision resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishInterest {
    FirstFull,
    Full,
    Partial,
}

/// The subset of a store-view's bookkeeping the dispatcher reads and
/// mutates. Kept separate from the view's prefix data so dispatch logic is
/// unit-testable without constructing a full view.
#[derive(Debug, Clone, Default)]
pub struct DispatchBookkeeping {
    pub state: Option<DispatchState>,
    pub full: DispatchFlags,
    pub partial: DispatchFlags,
    pub done_clients: HashSet<String>,
}

impl DispatchBookkeeping {
    pub fn new() -> Self {
        DispatchBookkeeping {
            state: Some(DispatchState::Unknown),
            ..Default::default()
        }
    }

    /// A never-allocated slot: distinct from `Unknown`, which means
    /// "allocated but no client has finished yet."
    pub fn new_unused() -> Self {
        DispatchBookkeeping {
            state: Some(DispatchState::Unused),
            ..Default::default()
        }
    }

    pub fn is_unused(&self) -> bool {
        matches!(self.state, Some(DispatchState::Unused) | None)
    }

    /// Marks both interest classes modified -- called whenever the
    /// underlying view's data changes (a row applied, a table-end seen).
    pub fn mark_modified(&mut self) {
        self.full.modified = true;
        self.partial.modified = true;
    }

    pub fn client_done(&mut self, client: impl Into<String>) {
        self.done_clients.insert(client.into());
    }

    pub fn reset(&mut self) {
        *self = DispatchBookkeeping::new();
    }
}

/// Derives `Partial`/`Full` from which producing clients have finished
/// their table for this view. Vacuously `Full` if there are no producing
/// clients at all.
fn derive_state(done_clients: &HashSet<String>, producing_clients: &HashSet<String>) -> DispatchState {
    if producing_clients.iter().all(|c| done_clients.contains(c)) {
        DispatchState::Full
    } else {
        DispatchState::Partial
    }
}

/// Result of one dispatch evaluation: what (if anything) to publish, and
/// whether the caller must remove the view afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub publish: Option<PublishInterest>,
    pub remove_after: bool,
}

/// Runs the completion check and dispatch rules for one trigger (spec
/// §4.F). `producing_clients` is the set of clients registered with
/// `PRODUCES_PREFIX` intent against this store.
pub fn evaluate(
    book: &mut DispatchBookkeeping,
    trigger: CompletionTrigger,
    producing_clients: &HashSet<String>,
    config: &Config,
) -> DispatchOutcome {
    let mut state = derive_state(&book.done_clients, producing_clients);
    if trigger.forces_full_and_removal() {
        state = DispatchState::Full;
    }
    book.state = Some(state);

    let publish = if state == DispatchState::Full && book.full.modified {
        let interest = if !book.full.sent {
            PublishInterest::FirstFull
        } else {
            PublishInterest::Full
        };
        book.full.modified = false;
        book.full.sent = true;
        Some(interest)
    } else if state == DispatchState::Partial && book.partial.modified && config.publish_partial {
        book.partial.modified = false;
        book.partial.sent = true;
        Some(PublishInterest::Partial)
    } else {
        None
    };

    DispatchOutcome {
        publish,
        remove_after: trigger.forces_full_and_removal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_full_fires_once() {
        let config = Config::default();
        let producing = clients(&["A"]);
        let mut book = DispatchBookkeeping::new();
        book.mark_modified();
        book.client_done("A");

        let out1 = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out1.publish, Some(PublishInterest::FirstFull));

        // nothing changed: no further publish
        let out2 = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out2.publish, None);

        // another relevant change after first-full: now plain Full
        book.mark_modified();
        let out3 = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out3.publish, Some(PublishInterest::Full));
    }

    #[test]
    fn test_partial_then_full() {
        let config = Config::default();
        let producing = clients(&["A", "B"]);
        let mut book = DispatchBookkeeping::new();
        book.mark_modified();
        book.client_done("A");

        let out1 = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out1.publish, Some(PublishInterest::Partial));

        book.mark_modified();
        book.client_done("B");
        let out2 = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out2.publish, Some(PublishInterest::FirstFull));
    }

    #[test]
    fn test_partial_publish_disabled_by_config() {
        let config = Config {
            publish_partial: false,
            ..Config::default()
        };
        let producing = clients(&["A", "B"]);
        let mut book = DispatchBookkeeping::new();
        book.mark_modified();
        book.client_done("A");

        let out = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out.publish, None);
    }

    #[test]
    fn test_window_exceeded_forces_full_and_removal() {
        let config = Config::default();
        let producing = clients(&["A", "B"]);
        let mut book = DispatchBookkeeping::new();
        book.mark_modified();
        book.client_done("A"); // B never finishes

        let out = evaluate(
            &mut book,
            CompletionTrigger::WindowExceeded,
            &producing,
            &config,
        );
        assert_eq!(out.publish, Some(PublishInterest::FirstFull));
        assert!(out.remove_after);
    }

    #[test]
    fn test_no_producing_clients_is_vacuously_full() {
        let config = Config::default();
        let producing = HashSet::new();
        let mut book = DispatchBookkeeping::new();
        book.mark_modified();
        let out = evaluate(&mut book, CompletionTrigger::TableEnd, &producing, &config);
        assert_eq!(out.publish, Some(PublishInterest::FirstFull));
    }
}

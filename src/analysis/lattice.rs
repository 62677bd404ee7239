//! A lattice tracking the sources that flowed into each abstract variable.

use crate::ir::Var;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The set of sources that may have flowed into one variable.
///
/// The empty set is the bottom element; `Top` says any source at all may
/// have contributed. The lattice has finite height over any fixed source
/// universe, so widening is the join.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Taint {
    Top,
    Taints(BTreeSet<Var>),
}

impl Taint {
    /// The empty source set.
    pub fn bottom() -> Taint {
        Taint::Taints(BTreeSet::new())
    }

    /// A single source.
    pub fn source(var: Var) -> Taint {
        let mut set = BTreeSet::new();
        set.insert(var);
        Taint::Taints(set)
    }

    /// A set of sources.
    pub fn sources<I: IntoIterator<Item = Var>>(vars: I) -> Taint {
        Taint::Taints(vars.into_iter().collect())
    }

    pub fn is_bottom(&self) -> bool {
        match self {
            Taint::Top => false,
            Taint::Taints(set) => set.is_empty(),
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Taint::Top)
    }

    /// Joins the sources of `other` into this taint by set union.
    pub fn join(self, other: &Taint) -> Taint {
        match self {
            Taint::Top => Taint::Top,
            Taint::Taints(mut lhs) => match other {
                Taint::Top => Taint::Top,
                Taint::Taints(rhs) => {
                    lhs.extend(rhs.iter().cloned());
                    Taint::Taints(lhs)
                }
            },
        }
    }

    /// True if this taint is at least as large as `other` in the lattice
    /// order.
    pub fn subsumes(&self, other: &Taint) -> bool {
        match (self, other) {
            (Taint::Top, _) => true,
            (Taint::Taints(_), Taint::Top) => false,
            (Taint::Taints(lhs), Taint::Taints(rhs)) => rhs.is_subset(lhs),
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Taint::Top => write!(f, "top"),
            Taint::Taints(set) => {
                let sources: Vec<String> = set.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", sources.join(", "))
            }
        }
    }
}

/// An abstract state mapping each variable to the taint that reached it.
///
/// The map is normalized: a variable whose taint is bottom is simply not
/// stored, so structural equality of two states is equality of the
/// mappings they denote.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaintState {
    taints: BTreeMap<Var, Taint>,
}

impl TaintState {
    /// The bottom state: nothing is tainted.
    pub fn new() -> TaintState {
        TaintState {
            taints: BTreeMap::new(),
        }
    }

    /// A state where every given key carries the universal source set.
    pub fn top<I: IntoIterator<Item = Var>>(keys: I) -> TaintState {
        TaintState {
            taints: keys.into_iter().map(|k| (k, Taint::Top)).collect(),
        }
    }

    /// The taint of a variable; bottom if the variable is unknown.
    pub fn get(&self, var: Var) -> Taint {
        self.taints.get(&var).cloned().unwrap_or_else(Taint::bottom)
    }

    /// Overwrites the taint of a variable.
    pub fn replace(&mut self, var: Var, taint: Taint) {
        if taint.is_bottom() {
            self.taints.remove(&var);
        } else {
            self.taints.insert(var, taint);
        }
    }

    /// Moves the taint stored under `old` to the key `new`.
    ///
    /// A no-op when both keys are equal. When `old` carries no taint, `new`
    /// ends up carrying none either.
    pub fn rename_key(&mut self, old: Var, new: Var) {
        if old == new {
            return;
        }
        match self.taints.remove(&old) {
            Some(taint) => {
                self.taints.insert(new, taint);
            }
            None => {
                self.taints.remove(&new);
            }
        }
    }

    /// Keeps only the given keys.
    pub fn restrict(&mut self, keys: &BTreeSet<Var>) {
        self.taints.retain(|var, _| keys.contains(var));
    }

    /// Joins another state into this one, pointwise.
    pub fn join(mut self, other: &TaintState) -> TaintState {
        for (var, taint) in &other.taints {
            let joined = self.get(*var).join(taint);
            self.replace(*var, joined);
        }
        self
    }

    /// Widening; the join, since the lattice has finite height.
    pub fn widen(self, other: &TaintState) -> TaintState {
        self.join(other)
    }

    /// True if every taint in `other` is subsumed by this state.
    pub fn subsumes(&self, other: &TaintState) -> bool {
        other
            .taints
            .iter()
            .all(|(var, taint)| self.get(*var).subsumes(taint))
    }

    pub fn is_bottom(&self) -> bool {
        self.taints.is_empty()
    }

    /// Iterates over the stored (variable, taint) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Taint)> {
        self.taints.iter()
    }

    /// The variables that carry taint in this state.
    pub fn keys(&self) -> impl Iterator<Item = &Var> {
        self.taints.keys()
    }
}

impl fmt::Display for TaintState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let entries: Vec<String> = self
            .taints
            .iter()
            .map(|(var, taint)| format!("{} -> {}", var, taint))
            .collect();
        write!(f, "[{}]", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_set_union() {
        let a = Taint::source(Var::Local(0));
        let b = Taint::source(Var::Local(1));

        let joined = a.join(&b);

        assert_eq!(joined, Taint::sources(vec![Var::Local(0), Var::Local(1)]));
    }

    #[test]
    fn test_top_absorbs() {
        let a = Taint::source(Var::Local(0));

        assert_eq!(a.clone().join(&Taint::Top), Taint::Top);
        assert_eq!(Taint::Top.join(&a), Taint::Top);
    }

    #[test]
    fn test_bottom_entries_are_not_stored() {
        let mut state = TaintState::new();
        state.replace(Var::Local(0), Taint::bottom());

        assert_eq!(state, TaintState::new());
        assert_eq!(state.get(Var::Local(0)), Taint::bottom());
    }

    #[test]
    fn test_rename_key_moves_the_taint() {
        let mut state = TaintState::new();
        state.replace(Var::Sym(0), Taint::source(Var::Local(0)));

        state.rename_key(Var::Sym(0), Var::Sym(5));

        assert_eq!(state.get(Var::Sym(0)), Taint::bottom());
        assert_eq!(state.get(Var::Sym(5)), Taint::source(Var::Local(0)));
    }

    #[test]
    fn test_rename_key_of_untainted_source_clears_the_target() {
        let mut state = TaintState::new();
        state.replace(Var::Sym(5), Taint::source(Var::Local(0)));

        state.rename_key(Var::Sym(0), Var::Sym(5));

        assert_eq!(state.get(Var::Sym(5)), Taint::bottom());
    }

    #[test]
    fn test_rename_key_round_trips() {
        let mut state = TaintState::new();
        state.replace(Var::Sym(0), Taint::source(Var::Local(0)));
        state.replace(Var::Sym(1), Taint::source(Var::Local(1)));
        let original = state.clone();

        // s9 carries no taint, so renaming there and back is the identity
        state.rename_key(Var::Sym(0), Var::Sym(9));
        state.rename_key(Var::Sym(9), Var::Sym(0));

        assert_eq!(state, original);
    }

    #[test]
    fn test_restrict_drops_other_keys() {
        let mut state = TaintState::new();
        state.replace(Var::Sym(0), Taint::source(Var::Local(0)));
        state.replace(Var::Sym(1), Taint::source(Var::Local(1)));

        let keys: BTreeSet<Var> = vec![Var::Sym(1)].into_iter().collect();
        state.restrict(&keys);

        assert_eq!(state.get(Var::Sym(0)), Taint::bottom());
        assert_eq!(state.get(Var::Sym(1)), Taint::source(Var::Local(1)));
    }

    #[test]
    fn test_state_join_is_pointwise() {
        let mut a = TaintState::new();
        a.replace(Var::Sym(0), Taint::source(Var::Local(0)));

        let mut b = TaintState::new();
        b.replace(Var::Sym(0), Taint::source(Var::Local(1)));
        b.replace(Var::Sym(1), Taint::Top);

        let joined = a.join(&b);

        assert_eq!(
            joined.get(Var::Sym(0)),
            Taint::sources(vec![Var::Local(0), Var::Local(1)])
        );
        assert_eq!(joined.get(Var::Sym(1)), Taint::Top);
        assert!(joined.subsumes(&b));
    }
}

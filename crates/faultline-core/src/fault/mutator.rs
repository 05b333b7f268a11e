//! Protocol-supplied payload mutators.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use crate::{error::SimError, message::Message};

/// Mutator identifier.
pub type MutatorId = String;

type MutateFn<M> = Arc<dyn Fn(&M) -> M + Send + Sync>;

/// Structural corruption of one or more payload variants.
///
/// Returns a modified copy; the original payload is untouched until the
/// store swaps it in.
pub struct Mutator<M> {
    id: MutatorId,
    name: String,
    accepts: BTreeSet<&'static str>,
    mutate: MutateFn<M>,
}

impl<M> Clone for Mutator<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            accepts: self.accepts.clone(),
            mutate: Arc::clone(&self.mutate),
        }
    }
}

impl<M> fmt::Debug for Mutator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .finish_non_exhaustive()
    }
}

impl<M: Message> Mutator<M> {
    /// Mutator `id` applying `mutate` to payloads tagged with one of `accepts`.
    pub fn new<I, F>(
        id: impl Into<MutatorId>,
        name: impl Into<String>,
        accepts: I,
        mutate: F,
    ) -> Self
    where
        I: IntoIterator<Item = &'static str>,
        F: Fn(&M) -> M + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            accepts: accepts.into_iter().collect(),
            mutate: Arc::new(mutate),
        }
    }

    /// Unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether payloads tagged `tag` can be mutated.
    pub fn accepts(&self, tag: &str) -> bool {
        self.accepts.contains(tag)
    }

    /// Mutated copy of `payload`.
    ///
    /// Fails with [`SimError::UnsupportedMutation`] if the payload variant is
    /// not accepted.
    pub fn apply(&self, payload: &M) -> Result<M, SimError> {
        let tag = payload.tag();
        if !self.accepts(tag) {
            return Err(SimError::UnsupportedMutation { mutator: self.id.clone(), tag });
        }
        Ok((self.mutate)(payload))
    }
}

/// Mutators known to a scenario, keyed by id.
#[derive(Debug, Clone)]
pub struct MutatorRegistry<M> {
    mutators: BTreeMap<MutatorId, Mutator<M>>,
}

impl<M> Default for MutatorRegistry<M> {
    fn default() -> Self {
        Self { mutators: BTreeMap::new() }
    }
}

impl<M: Message> MutatorRegistry<M> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mutator, replacing any with the same id.
    pub fn register(&mut self, mutator: Mutator<M>) {
        self.mutators.insert(mutator.id.clone(), mutator);
    }

    /// Mutator by id.
    pub fn get(&self, id: &str) -> Option<&Mutator<M>> {
        self.mutators.get(id)
    }

    /// Mutator by id, or [`SimError::UnknownMutator`].
    pub fn require(&self, id: &str) -> Result<&Mutator<M>, SimError> {
        self.get(id).ok_or_else(|| SimError::UnknownMutator(id.to_owned()))
    }

    /// Mutators accepting payloads tagged `tag`, in id order.
    pub fn for_tag(&self, tag: &str) -> Vec<&Mutator<M>> {
        self.mutators.values().filter(|m| m.accepts(tag)).collect()
    }

    /// Whether any mutator accepts `payload`.
    pub fn can_mutate(&self, payload: &M) -> bool {
        self.mutators.values().any(|m| m.accepts(payload.tag()))
    }

    /// All mutators in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutator<M>> {
        self.mutators.values()
    }

    /// Number of mutators.
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    /// Whether no mutator is registered.
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }
}

impl<M: Message> FromIterator<Mutator<M>> for MutatorRegistry<M> {
    fn from_iter<T: IntoIterator<Item = Mutator<M>>>(iter: T) -> Self {
        let mut registry = Self::new();
        for mutator in iter {
            registry.register(mutator);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Vote {
        Yes(u64),
        No,
    }

    impl Message for Vote {
        fn tag(&self) -> &'static str {
            match self {
                Self::Yes(_) => "YES",
                Self::No => "NO",
            }
        }
    }

    fn flip() -> Mutator<Vote> {
        Mutator::new("flip", "Yes becomes No", ["YES"], |_: &Vote| Vote::No)
    }

    #[test]
    fn apply_checks_tag() {
        let m = flip();
        assert_eq!(m.apply(&Vote::Yes(1)), Ok(Vote::No));
        assert_eq!(
            m.apply(&Vote::No),
            Err(SimError::UnsupportedMutation { mutator: "flip".into(), tag: "NO" })
        );
    }

    #[test]
    fn registry_filters_by_tag() {
        let registry: MutatorRegistry<Vote> = [
            flip(),
            Mutator::new("bump", "Increment", ["YES"], |v: &Vote| match v {
                Vote::Yes(n) => Vote::Yes(n + 1),
                Vote::No => Vote::No,
            }),
            Mutator::new("noop", "Identity on No", ["NO"], |v: &Vote| v.clone()),
        ]
        .into_iter()
        .collect();

        let ids: Vec<_> = registry.for_tag("YES").iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["bump", "flip"]);
        assert!(registry.can_mutate(&Vote::No));
        assert_eq!(
            registry.require("nope").map(Mutator::id),
            Err(SimError::UnknownMutator("nope".into()))
        );
    }
}

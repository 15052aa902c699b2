//! Replication graph: decide what each observer receives, then clear once.
//!
//! The graph owns the authoritative [`Holder`] of every replicated entity,
//! keyed by [`EntityGuid`]. For each observer it produces creates (baseline
//! payloads), updates (diff payloads) and destroys, filtered by the
//! visibility an [`ObserverGrants`] adapter grants that observer for each
//! entity. Payloads are shared between observers with the same grants for
//! the same entity within a tick.
//!
//! Change masks are cleared once per tick, after every observer has been
//! served: call [`ReplicationGraph::run_tick`], or serve observers with
//! [`ReplicationGraph::build_observer_update`] and then call
//! [`ReplicationGraph::clear_changes`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use codec::{
    encode_baseline, encode_diff_with_scratch, has_visible_changes, CodecError, CodecScratch,
    EntityGuid, Holder,
};
use schema::Visibility;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors from the replication graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// The tracked-entity cap was reached.
    EntityLimit { limit: usize },
    /// An entity with this identifier is already tracked.
    DuplicateEntity { entity: EntityGuid },
    /// The empty identifier cannot name an entity.
    EmptyGuid,
    /// Building a payload failed.
    Codec(CodecError),
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityLimit { limit } => write!(f, "entity limit {limit} reached"),
            Self::DuplicateEntity { entity } => write!(f, "entity {entity} already tracked"),
            Self::EmptyGuid => write!(f, "the empty identifier cannot name an entity"),
            Self::Codec(e) => write!(f, "payload build failed: {e}"),
        }
    }
}

impl std::error::Error for ReplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for ReplicationError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

/// Observer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u32);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Replication graph configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Maximum entities tracked globally (hard safety cap).
    pub max_entities: usize,
}

impl ReplicationConfig {
    #[must_use]
    pub const fn default_limits() -> Self {
        Self {
            max_entities: 1_000_000,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::default_limits()
    }
}

/// Grants adapter supplied by the session layer.
pub trait ObserverGrants {
    /// Visibility granted to `observer` for `entity`, or `None` when the
    /// entity is not relevant to that observer.
    fn grants(&self, observer: ObserverId, entity: EntityGuid) -> Option<Visibility>;
}

impl<F> ObserverGrants for F
where
    F: Fn(ObserverId, EntityGuid) -> Option<Visibility>,
{
    fn grants(&self, observer: ObserverId, entity: EntityGuid) -> Option<Visibility> {
        self(observer, entity)
    }
}

/// One encoded payload for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityPayload {
    pub entity: EntityGuid,
    /// Visibility the payload was filtered with.
    pub granted: Visibility,
    pub bytes: Arc<[u8]>,
}

/// Per-observer output for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverUpdate {
    /// Baselines for entities new to the observer (or whose grants changed).
    pub creates: Vec<EntityPayload>,
    /// Diffs for known entities with visible changes.
    pub updates: Vec<EntityPayload>,
    /// Entities the observer must drop.
    pub destroys: Vec<EntityGuid>,
}

impl ObserverUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.destroys.is_empty() && self.updates.is_empty()
    }

    /// Total payload bytes (creates and updates).
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.creates
            .iter()
            .chain(&self.updates)
            .map(|payload| payload.bytes.len())
            .sum()
    }
}

/// Payload build counters since the last clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Payloads encoded.
    pub built: usize,
    /// Payloads served from the per-tick cache.
    pub reused: usize,
}

#[derive(Debug, Default)]
struct PayloadCache {
    scratch: CodecScratch,
    baselines: HashMap<(EntityGuid, Visibility), Arc<[u8]>>,
    diffs: HashMap<(EntityGuid, Visibility), Option<Arc<[u8]>>>,
    stats: TickStats,
}

impl PayloadCache {
    fn baseline(
        &mut self,
        entity: EntityGuid,
        holder: &Holder,
        granted: Visibility,
    ) -> ReplicationResult<Arc<[u8]>> {
        if let Some(bytes) = self.baselines.get(&(entity, granted)) {
            self.stats.reused += 1;
            return Ok(Arc::clone(bytes));
        }
        let bytes: Arc<[u8]> = encode_baseline(holder, granted)?.into();
        self.stats.built += 1;
        self.baselines.insert((entity, granted), Arc::clone(&bytes));
        Ok(bytes)
    }

    fn diff(
        &mut self,
        entity: EntityGuid,
        holder: &Holder,
        granted: Visibility,
    ) -> ReplicationResult<Option<Arc<[u8]>>> {
        if let Some(cached) = self.diffs.get(&(entity, granted)) {
            if cached.is_some() {
                self.stats.reused += 1;
            }
            return Ok(cached.clone());
        }
        let bytes = if has_visible_changes(holder, granted) {
            self.stats.built += 1;
            Some(Arc::from(encode_diff_with_scratch(
                holder,
                granted,
                &mut self.scratch,
            )?))
        } else {
            None
        };
        self.diffs.insert((entity, granted), bytes.clone());
        Ok(bytes)
    }

    fn forget(&mut self, entity: EntityGuid) {
        self.baselines.retain(|(id, _), _| *id != entity);
        self.diffs.retain(|(id, _), _| *id != entity);
    }

    fn clear(&mut self) {
        self.baselines.clear();
        self.diffs.clear();
        self.stats = TickStats::default();
    }
}

/// Grants and insertion generation behind an observer's replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KnownEntity {
    granted: Visibility,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
struct ObserverState {
    /// Entities the observer holds a replica of, as of its last baseline.
    known: BTreeMap<EntityGuid, KnownEntity>,
}

#[derive(Debug)]
struct TrackedEntity {
    holder: Holder,
    generation: u64,
}

/// Replication graph over entity holders.
#[derive(Debug)]
pub struct ReplicationGraph {
    config: ReplicationConfig,
    entities: BTreeMap<EntityGuid, TrackedEntity>,
    next_generation: u64,
    observers: HashMap<ObserverId, ObserverState>,
    cache: PayloadCache,
}

impl ReplicationGraph {
    #[must_use]
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
            next_generation: 0,
            observers: HashMap::new(),
            cache: PayloadCache::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Starts tracking an entity.
    pub fn insert_entity(&mut self, entity: EntityGuid, holder: Holder) -> ReplicationResult<()> {
        if entity.is_empty() {
            return Err(ReplicationError::EmptyGuid);
        }
        if self.entities.contains_key(&entity) {
            return Err(ReplicationError::DuplicateEntity { entity });
        }
        if self.entities.len() >= self.config.max_entities {
            log::warn!(
                "dropping entity {entity}: limit {} reached",
                self.config.max_entities
            );
            return Err(ReplicationError::EntityLimit {
                limit: self.config.max_entities,
            });
        }
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.entities
            .insert(entity, TrackedEntity { holder, generation });
        Ok(())
    }

    /// Stops tracking an entity.
    ///
    /// Every observer that still holds a replica receives a destroy on its
    /// next update, whichever tick that is.
    pub fn remove_entity(&mut self, entity: EntityGuid) -> Option<Holder> {
        let Some(tracked) = self.entities.remove(&entity) else {
            log::warn!("remove of unknown entity {entity}");
            return None;
        };
        self.cache.forget(entity);
        Some(tracked.holder)
    }

    #[must_use]
    pub fn entity(&self, entity: EntityGuid) -> Option<&Holder> {
        self.entities.get(&entity).map(|tracked| &tracked.holder)
    }

    /// Mutable access for gameplay writes through [`Holder::modify`].
    pub fn entity_mut(&mut self, entity: EntityGuid) -> Option<&mut Holder> {
        self.entities
            .get_mut(&entity)
            .map(|tracked| &mut tracked.holder)
    }

    /// Iterates tracked entities in identifier order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityGuid, &Holder)> + '_ {
        self.entities
            .iter()
            .map(|(id, tracked)| (*id, &tracked.holder))
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Registers an observer with no known entities. Re-adding is a no-op.
    pub fn add_observer(&mut self, observer: ObserverId) {
        self.observers.entry(observer).or_default();
    }

    /// Drops an observer and its known-entity state.
    pub fn remove_observer(&mut self, observer: ObserverId) -> bool {
        self.observers.remove(&observer).is_some()
    }

    /// Registered observers in ascending order.
    #[must_use]
    pub fn observers(&self) -> Vec<ObserverId> {
        let mut ids: Vec<_> = self.observers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Entities the observer currently holds a replica of.
    #[must_use]
    pub fn known_entities(&self, observer: ObserverId) -> Option<Vec<EntityGuid>> {
        self.observers
            .get(&observer)
            .map(|state| state.known.keys().copied().collect())
    }

    /// Payload counters since the last clear.
    #[must_use]
    pub const fn tick_stats(&self) -> TickStats {
        self.cache.stats
    }

    /// Builds one observer's creates, updates and destroys for this tick.
    ///
    /// An entity whose grants differ from those of the observer's last
    /// baseline, or that was removed and re-inserted since then, is sent a
    /// fresh baseline. Known entities that are no longer tracked are
    /// destroyed. Unknown observers get an empty update.
    pub fn build_observer_update(
        &mut self,
        observer: ObserverId,
        grants: &impl ObserverGrants,
    ) -> ReplicationResult<ObserverUpdate> {
        let Some(state) = self.observers.get_mut(&observer) else {
            log::warn!("update requested for unknown {observer}");
            return Ok(ObserverUpdate::default());
        };

        let mut update = ObserverUpdate::default();
        for (&entity, tracked) in &self.entities {
            let Some(granted) = grants.grants(observer, entity) else {
                if state.known.remove(&entity).is_some() {
                    update.destroys.push(entity);
                }
                continue;
            };
            let current = KnownEntity {
                granted,
                generation: tracked.generation,
            };
            let holder = &tracked.holder;
            if state.known.get(&entity) == Some(&current) {
                if let Some(bytes) = self.cache.diff(entity, holder, granted)? {
                    update.updates.push(EntityPayload {
                        entity,
                        granted,
                        bytes,
                    });
                }
                continue;
            }
            let bytes = self.cache.baseline(entity, holder, granted)?;
            state.known.insert(entity, current);
            update.creates.push(EntityPayload {
                entity,
                granted,
                bytes,
            });
        }

        let entities = &self.entities;
        state.known.retain(|entity, _| {
            let tracked = entities.contains_key(entity);
            if !tracked {
                update.destroys.push(*entity);
            }
            tracked
        });
        update.destroys.sort_unstable();

        log::trace!(
            "{observer}: {} creates, {} updates, {} destroys, {} bytes",
            update.creates.len(),
            update.updates.len(),
            update.destroys.len(),
            update.payload_bytes()
        );
        Ok(update)
    }

    /// Clears every entity's change state and the per-tick caches.
    pub fn clear_changes(&mut self) {
        let stats = self.cache.stats;
        for tracked in self.entities.values_mut() {
            tracked.holder.clear_changes();
        }
        self.cache.clear();
        log::debug!(
            "cleared {} entities ({} payloads built, {} reused)",
            self.entities.len(),
            stats.built,
            stats.reused
        );
    }

    /// Serves every registered observer, then clears change state once.
    pub fn run_tick(
        &mut self,
        grants: &impl ObserverGrants,
    ) -> ReplicationResult<BTreeMap<ObserverId, ObserverUpdate>> {
        let mut updates = BTreeMap::new();
        for observer in self.observers() {
            let update = self.build_observer_update(observer, grants)?;
            updates.insert(observer, update);
        }
        self.clear_changes();
        Ok(updates)
    }
}

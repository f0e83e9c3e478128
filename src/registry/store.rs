//! Entity registry implementation
//!
//! The shared registry that every handler instance reports into.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::entry::{Entity, EntityCounts, EntityKind};
use super::error::RegistryError;

/// Central registry for all known devices and sessions
///
/// Thread-safe via `RwLock`. Writers (register, touch, sweep) are serialized;
/// readers receive cloned snapshots.
pub struct EntityRegistry {
    /// Map of entity id to entity record
    entities: RwLock<HashMap<String, Entity>>,

    /// Configuration
    config: RegistryConfig,
}

impl EntityRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an entity, or refresh an existing one
    ///
    /// The entity is marked online and seen now. Re-registering keeps the
    /// existing attachment count and any metadata the new record leaves unset.
    pub async fn register(&self, entity: Entity) -> Entity {
        let now = Utc::now();
        let mut entities = self.entities.write().await;

        match entities.get_mut(&entity.id) {
            Some(existing) => {
                existing.merge_metadata(entity);
                existing.mark_seen(now);
                existing.clone()
            }
            None => {
                let mut fresh = entity;
                fresh.attached_streams = 0;
                fresh.mark_seen(now);
                entities.insert(fresh.id.clone(), fresh.clone());

                tracing::info!(
                    entity_id = %fresh.id,
                    kind = ?fresh.kind,
                    location = fresh.location.as_deref().unwrap_or("-"),
                    "Entity registered"
                );
                fresh
            }
        }
    }

    /// Record activity for a known entity
    pub async fn touch(&self, id: &str) -> Result<Entity, RegistryError> {
        self.touch_at(id, Utc::now()).await
    }

    /// Record activity at an explicit instant
    pub async fn touch_at(&self, id: &str, now: DateTime<Utc>) -> Result<Entity, RegistryError> {
        let mut entities = self.entities.write().await;

        let entity = entities
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if !entity.online {
            tracing::info!(entity_id = %id, "Entity back online");
        }
        entity.mark_seen(now);
        Ok(entity.clone())
    }

    /// Record activity, registering a new entity of `kind` if the id is unseen
    pub async fn touch_or_register(&self, id: &str, kind: EntityKind) -> Entity {
        match self.touch(id).await {
            Ok(entity) => entity,
            Err(RegistryError::NotFound(_)) => self.register(Entity::new(id, kind)).await,
        }
    }

    /// Look up a single entity
    pub async fn get(&self, id: &str) -> Result<Entity, RegistryError> {
        self.entities
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of all entities, ordered by id
    pub async fn list(&self) -> Vec<Entity> {
        let mut snapshot: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Snapshot of physical devices only
    pub async fn devices(&self) -> Vec<Entity> {
        let mut devices = self.list().await;
        devices.retain(|e| e.kind.is_device());
        devices
    }

    /// Get total number of entities
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Online/offline tallies
    pub async fn counts(&self) -> EntityCounts {
        let entities = self.entities.read().await;
        let mut counts = EntityCounts::default();

        for entity in entities.values() {
            match (entity.kind.is_device(), entity.online) {
                (true, true) => counts.online_devices += 1,
                (true, false) => counts.offline_devices += 1,
                (false, _) => counts.sessions += 1,
            }
        }

        counts
    }

    /// Mark an entity as referenced by an active stream
    pub async fn attach(&self, id: &str) -> Result<(), RegistryError> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entity.attached_streams += 1;
        Ok(())
    }

    /// Release a stream reference taken with [`attach`](Self::attach)
    pub async fn detach(&self, id: &str) {
        let mut entities = self.entities.write().await;
        if let Some(entity) = entities.get_mut(id) {
            entity.attached_streams = entity.attached_streams.saturating_sub(1);
        }
    }

    /// Mark entities silent for longer than `timeout` as offline
    ///
    /// Returns the number of entities that flipped offline in this sweep.
    pub async fn sweep(&self, timeout: Duration) -> usize {
        self.sweep_at(Utc::now(), timeout).await
    }

    /// Sweep against an explicit clock reading
    pub async fn sweep_at(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut entities = self.entities.write().await;
        let mut marked = 0;

        for entity in entities.values_mut() {
            // Entities with a live stream are kept online by the stream itself
            if entity.online && entity.attached_streams == 0 && entity.idle_for(now) > timeout {
                entity.online = false;
                marked += 1;

                tracing::info!(
                    entity_id = %entity.id,
                    idle_secs = entity.idle_for(now).as_secs(),
                    "Entity marked offline"
                );
            }
        }

        marked
    }

    /// Remove offline entities idle for longer than `retention`
    ///
    /// Entities still attached to a stream are never removed.
    pub async fn evict(&self, retention: Duration) -> usize {
        self.evict_at(Utc::now(), retention).await
    }

    /// Evict against an explicit clock reading
    pub async fn evict_at(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut entities = self.entities.write().await;
        let before = entities.len();

        entities.retain(|id, entity| {
            let stale = !entity.online
                && entity.attached_streams == 0
                && entity.idle_for(now) > retention;
            if stale {
                tracing::info!(entity_id = %id, "Entity removed by eviction");
            }
            !stale
        });

        before - entities.len()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

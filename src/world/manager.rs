//! Process-wide map id → field registry with coalesced lazy creation.
//!
//! The fast path is a read lock on the published map. On a miss, callers
//! for the same map id share one in-flight `OnceCell`, so only one of them
//! runs the creation closure. The winner publishes under the write lock; if
//! something was published first, the new field is closed before its first
//! tick and the published one is returned.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::data::{MapProvider, MobProvider};
use crate::error::{constants, Result, ServerError};
use crate::utils::global_metrics;
use crate::world::field::{Field, FieldSettings, TickHook};

type Inflight = Arc<OnceCell<Arc<Field>>>;

pub struct FieldManager {
    fields: RwLock<HashMap<i32, Arc<Field>>>,
    inflight: Mutex<HashMap<i32, Inflight>>,
    maps: Arc<dyn MapProvider>,
    mobs: Arc<dyn MobProvider>,
    settings: FieldSettings,
    hooks: Vec<Arc<dyn TickHook>>,
}

impl FieldManager {
    pub fn new(
        maps: Arc<dyn MapProvider>,
        mobs: Arc<dyn MobProvider>,
        settings: FieldSettings,
    ) -> Self {
        Self {
            fields: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            maps,
            mobs,
            settings,
            hooks: Vec::new(),
        }
    }

    /// Attach a hook to every field created from now on.
    pub fn with_tick_hook(mut self, hook: Arc<dyn TickHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Published field for `map_id`, if any.
    pub fn get(&self, map_id: i32) -> Option<Arc<Field>> {
        self.fields.read().get(&map_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.fields.read().len()
    }

    pub fn all(&self) -> Vec<Arc<Field>> {
        self.fields.read().values().cloned().collect()
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_or_create(&self, map_id: i32) -> Result<Arc<Field>> {
        if let Some(field) = self.get(map_id) {
            return Ok(field);
        }

        let cell = self
            .inflight
            .lock()
            .entry(map_id)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async { self.create_and_publish(map_id) })
            .await
            .cloned();

        // Only the entry we used is removed; a later generation may already
        // have replaced it after a failed attempt.
        {
            let mut inflight = self.inflight.lock();
            if inflight
                .get(&map_id)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                inflight.remove(&map_id);
            }
        }

        result
    }

    fn create_and_publish(&self, map_id: i32) -> Result<Arc<Field>> {
        let data = self
            .maps
            .map(map_id)
            .ok_or(ServerError::FieldUnavailable(map_id))?;

        let field = Field::new(data, self.mobs.as_ref(), &self.settings, self.hooks.clone());

        let mut fields = self.fields.write();
        if let Some(existing) = fields.get(&map_id) {
            field.close();
            global_metrics().field_discarded();
            debug!(map_id, discarded = field.serial(), kept = existing.serial(), "Discarded duplicate field");
            return Ok(existing.clone());
        }
        fields.insert(map_id, field.clone());
        drop(fields);

        global_metrics().field_created();
        info!(map_id, serial = field.serial(), "Field created");
        Ok(field)
    }

    /// Resolve `map_id`, falling back to `default_map` once.
    pub async fn get_or_fallback(&self, map_id: i32, default_map: i32) -> Result<Arc<Field>> {
        match self.get_or_create(map_id).await {
            Ok(field) => Ok(field),
            Err(e) if map_id != default_map => {
                warn!(map_id, default_map, error = %e, "Map unavailable, using default map");
                self.get_or_create(default_map).await.map_err(|e| {
                    warn!(default_map, error = %e, "{}", constants::ERR_DEFAULT_MAP_UNAVAILABLE);
                    ServerError::FieldUnavailable(default_map)
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Close and forget every field.
    pub fn clear(&self) {
        let drained: Vec<_> = self.fields.write().drain().map(|(_, f)| f).collect();
        for field in &drained {
            field.close();
        }
        info!(fields = drained.len(), "Field manager cleared");
    }
}

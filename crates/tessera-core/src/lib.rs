//! Dynamic-object subsystem of the tessera engine.
//!
//! Entities are movable world objects keyed by generational handles and owned
//! by a [`World`]. The world couples entity positions to an on-demand
//! chunk-streaming map, answers spherical collision queries over the live
//! set, derives per-entity paint-order covering cells, and runs the clamped
//! damage/health model. Everything here is single-threaded and cooperative:
//! one tick updates every active entity to completion, and disposal is a
//! flag swept by the world rather than an immediate destruction.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tessera_grid::{
    CELL_EDGE_LEN, Chunk, ChunkIndex, Coordinate, Direction, ENTITY_COLLISION_RADIUS, GridConfig,
    GridError, Point, RenderStorage,
};
use thiserror::Error;
use tracing::debug;

new_key_type! {
    /// Stable handle for entities backed by a generational slot map.
    pub struct EntityId;
}

/// Sprite id marking an object scheduled for deletion by the save layer.
pub const ENTITY_ID_DELETED: i8 = -1;
/// Sprite id of objects that exist logically but are never painted.
pub const ENTITY_ID_HIDDEN: i8 = 0;

/// Upper bound of the health domain; every write path clamps to `[0, 100]`.
pub const MAX_HEALTH: f32 = 100.0;

/// Capacity hint used when allocating collision query results.
const COLLISION_RESULT_HINT: usize = 5;

/// Errors raised when constructing a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Grid geometry rejected by the grid crate.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Static configuration for a tessera world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldConfig {
    /// Chunk and world-height geometry.
    pub grid: GridConfig,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Wall-clock milliseconds before an entity may play another damage sound.
    pub sound_cooldown_ms: f32,
    /// Maximum number of diagnostic lines retained by the console.
    pub console_capacity: usize,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            rng_seed: None,
            sound_cooldown_ms: 100.0,
            console_capacity: 256,
            history_capacity: 256,
        }
    }
}

impl WorldConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        self.grid.validate()?;
        if self.sound_cooldown_ms < 0.0 {
            return Err(WorldError::InvalidConfig(
                "sound_cooldown_ms must be non-negative",
            ));
        }
        if self.console_capacity == 0 || self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "console and history capacities must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Entities removed by the disposal sweep this tick.
    pub disposed: usize,
}

/// Summary retained in the in-memory tick history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub entity_count: usize,
    pub disposed: usize,
}

/// Supported entity variants. Embedders extend the set through `External`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EntityKind {
    #[default]
    Object,
    Explosion,
    BenchmarkBall,
    Shadow,
    External(String),
}

/// Companion driver advancing an entity's sprite value over time.
///
/// Mirrors the keyframe players of the animation layer without coupling to
/// asset loading: the world only needs a value per frame and an end signal.
pub trait AnimationDriver: Send {
    /// Advance by `dt` milliseconds, returning the sprite value to display.
    fn advance(&mut self, dt: f32) -> u8;

    /// True once a one-shot animation has played out.
    fn is_finished(&self) -> bool;
}

/// Frame player over a list of per-frame durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyframeAnimation {
    durations: Vec<f32>,
    frame: usize,
    remaining: f32,
    looping: bool,
    finished: bool,
}

impl KeyframeAnimation {
    /// Construct a player over `durations`; an empty or zero-length timeline
    /// is finished immediately.
    #[must_use]
    pub fn new(durations: Vec<f32>, looping: bool) -> Self {
        let finished = durations.iter().sum::<f32>() <= 0.0;
        let remaining = durations.first().copied().unwrap_or(0.0);
        Self {
            durations,
            frame: 0,
            remaining,
            looping,
            finished,
        }
    }

    /// Index of the frame currently displayed.
    #[must_use]
    pub const fn frame(&self) -> usize {
        self.frame
    }
}

impl AnimationDriver for KeyframeAnimation {
    fn advance(&mut self, dt: f32) -> u8 {
        if self.finished {
            return self.frame as u8;
        }
        self.remaining -= dt;
        while self.remaining <= 0.0 {
            if self.frame + 1 < self.durations.len() {
                self.frame += 1;
            } else if self.looping {
                self.frame = 0;
            } else {
                self.finished = true;
                self.remaining = 0.0;
                break;
            }
            self.remaining += self.durations[self.frame];
        }
        self.frame as u8
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// A movable world object bound to the map through an optional position.
///
/// An absent position means the entity is logically unspawned or removed: it
/// belongs to no chunk and is ignored by collision queries. Health lives in
/// `[0, 100]` on every write path, and the dispose flag latches once set.
#[derive(Serialize, Deserialize)]
pub struct Entity {
    id: i8,
    value: u8,
    kind: EntityKind,
    position: Option<Point>,
    collision_radius: f32,
    health: f32,
    dispose: bool,
    obstacle: bool,
    indestructible: bool,
    save_to_disk: bool,
    use_raw_delta: bool,
    dimension_z: f32,
    mass: f32,
    category: char,
    name: String,
    light_level: [f32; 3],
    #[serde(skip)]
    sound_cooldown: f32,
    #[serde(skip)]
    animation: Option<Box<dyn AnimationDriver>>,
    #[serde(skip)]
    shadow: Option<Box<Entity>>,
    #[serde(skip)]
    damage_sounds: Vec<String>,
    #[serde(skip)]
    covered: Vec<Coordinate>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("position", &self.position)
            .field("health", &self.health)
            .field("dispose", &self.dispose)
            .finish()
    }
}

impl Entity {
    /// Create an unspawned entity.
    ///
    /// Objects with id [`ENTITY_ID_DELETED`] are scheduled for deletion,
    /// [`ENTITY_ID_HIDDEN`] marks invisible objects.
    #[must_use]
    pub fn new(id: i8, value: u8) -> Self {
        Self {
            id,
            value,
            kind: EntityKind::default(),
            position: None,
            collision_radius: ENTITY_COLLISION_RADIUS,
            health: MAX_HEALTH,
            dispose: false,
            obstacle: false,
            indestructible: false,
            save_to_disk: true,
            use_raw_delta: false,
            dimension_z: CELL_EDGE_LEN,
            mass: 0.4,
            category: 'e',
            name: String::from("undefined"),
            light_level: [1.0; 3],
            sound_cooldown: 0.0,
            animation: None,
            shadow: None,
            damage_sounds: Vec::new(),
            covered: Vec::new(),
        }
    }

    /// Sprite/object id.
    #[must_use]
    pub const fn id(&self) -> i8 {
        self.id
    }

    /// Auxiliary sprite value (variation or animation frame).
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.value
    }

    pub fn set_value(&mut self, value: u8) {
        self.value = value;
    }

    /// Runtime variant of this entity.
    #[must_use]
    pub const fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: EntityKind) {
        self.kind = kind;
    }

    /// Current position, absent while the entity is not placed in the world.
    #[must_use]
    pub const fn position(&self) -> Option<Point> {
        self.position
    }

    /// Is the object active on the map? Spawning binds a position.
    #[must_use]
    pub const fn has_position(&self) -> bool {
        self.position.is_some()
    }

    /// Teleport an already placed entity. Spawning is the only way to place
    /// an unspawned one.
    pub fn set_position(&mut self, point: Point) {
        if self.position.is_some() {
            self.position = Some(point);
        }
    }

    /// Broad-phase radius, derived from tile geometry at construction.
    #[must_use]
    pub const fn collision_radius(&self) -> f32 {
        self.collision_radius
    }

    /// Current health, at most [`MAX_HEALTH`].
    #[must_use]
    pub const fn health(&self) -> f32 {
        self.health
    }

    /// Clamps to `[0, 100]`. Prefer the damage and heal operations on the
    /// world; this setter ignores indestructibility.
    pub fn set_health(&mut self, health: f32) {
        self.health = health.clamp(0.0, MAX_HEALTH);
    }

    /// Milliseconds of wall-clock time before another damage sound may play.
    #[must_use]
    pub const fn sound_cooldown(&self) -> f32 {
        self.sound_cooldown
    }

    /// Replace the pool the damage sound is drawn from.
    pub fn set_damage_sounds(&mut self, sounds: Vec<String>) {
        self.damage_sounds = sounds;
    }

    /// Make the object an obstacle or passable.
    pub fn set_obstacle(&mut self, obstacle: bool) {
        self.obstacle = obstacle;
    }

    #[must_use]
    pub const fn is_obstacle(&self) -> bool {
        self.obstacle
    }

    /// If the object can not be damaged. It can still be disposed and removed
    /// from the map.
    #[must_use]
    pub const fn is_indestructible(&self) -> bool {
        self.indestructible
    }

    pub fn set_indestructible(&mut self, indestructible: bool) {
        self.indestructible = indestructible;
    }

    /// Is the object written out by the save layer?
    #[must_use]
    pub const fn is_saved_to_disk(&self) -> bool {
        self.save_to_disk
    }

    /// Mark temporary objects to be skipped by the save layer.
    pub fn set_save_to_disk(&mut self, save_to_disk: bool) {
        self.save_to_disk = save_to_disk;
    }

    /// Whether updates advance on the wall-clock delta instead of the scaled
    /// simulation delta.
    #[must_use]
    pub const fn use_raw_delta(&self) -> bool {
        self.use_raw_delta
    }

    pub fn set_use_raw_delta(&mut self, use_raw_delta: bool) {
        self.use_raw_delta = use_raw_delta;
    }

    /// Vertical extent in game units.
    #[must_use]
    pub const fn dimension_z(&self) -> f32 {
        self.dimension_z
    }

    pub fn set_dimension_z(&mut self, dimension_z: f32) {
        self.dimension_z = dimension_z;
    }

    /// Mass in kg.
    #[must_use]
    pub const fn mass(&self) -> f32 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f32) {
        self.mass = mass;
    }

    /// Category used for the sprite-set lookup.
    #[must_use]
    pub const fn category(&self) -> char {
        self.category
    }

    pub fn set_category(&mut self, category: char) {
        self.category = category;
    }

    /// Human readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// RGB light level applied when painting the sprite.
    #[must_use]
    pub const fn light_level(&self) -> [f32; 3] {
        self.light_level
    }

    /// Set all three light channels to the same brightness.
    pub fn set_light_level(&mut self, level: f32) {
        self.light_level = [level; 3];
    }

    /// Give the entity an animation companion.
    pub fn set_animation(&mut self, animation: Box<dyn AnimationDriver>) {
        self.animation = Some(animation);
    }

    /// Whether an animation companion is currently attached.
    #[must_use]
    pub const fn has_animation(&self) -> bool {
        self.animation.is_some()
    }

    /// Detach the animation companion.
    pub fn clear_animation(&mut self) {
        self.animation = None;
    }

    /// Attach a shadow companion. If the entity is already placed the shadow
    /// binds immediately, otherwise it follows at spawn time.
    pub fn enable_shadow(&mut self) {
        let mut shadow = Entity::new(ENTITY_ID_HIDDEN, 0);
        shadow.kind = EntityKind::Shadow;
        shadow.name = String::from("shadow");
        shadow.save_to_disk = false;
        shadow.indestructible = true;
        shadow.position = self.position;
        self.shadow = Some(Box::new(shadow));
    }

    /// Dispose of and detach the shadow companion.
    pub fn disable_shadow(&mut self) {
        if let Some(mut shadow) = self.shadow.take() {
            shadow.dispose();
        }
    }

    /// The shadow companion, if enabled.
    #[must_use]
    pub fn shadow(&self) -> Option<&Entity> {
        self.shadow.as_deref()
    }

    /// Deletes the object from the map. The opposite of spawning; the entity
    /// stays in the live set until the next sweep if it was ever inserted.
    pub fn remove_from_map(&mut self) {
        self.position = None;
    }

    /// Marks the object for removal from the map and every other container.
    /// The flag latches: once set it is never cleared, and the owning world
    /// physically removes the entity at its next sweep.
    pub fn dispose(&mut self) {
        self.dispose = true;
        if let Some(shadow) = self.shadow.as_deref_mut() {
            shadow.dispose();
        }
        self.remove_from_map();
    }

    /// True if the next sweep removes this entity.
    #[must_use]
    pub const fn should_be_disposed(&self) -> bool {
        self.dispose
    }

    /// Spherical collision check. Unplaced operands never collide.
    #[must_use]
    pub fn collides_with(&self, other: &Entity) -> bool {
        let (Some(a), Some(b)) = (self.position, other.position) else {
            return false;
        };
        let reach = self.collision_radius + other.collision_radius;
        a.distance_squared(b) < reach * reach
    }

    /// Recompute which map cells must be painted before this entity so that
    /// back-to-front compositing stays correct at its current position.
    ///
    /// The returned slice borrows a per-entity scratch buffer and is only
    /// valid until the next call on the same entity; callers must not retain
    /// it across calls.
    pub fn compute_covered(&mut self, storage: &dyn RenderStorage) -> &[Coordinate] {
        self.covered.clear();
        if let Some(position) = self.position {
            // Entities are placed one cell above their supporting cell, step
            // down before deriving paint order.
            let coord = position.to_coord().shifted(0, 0, -1);
            if coord.z < 1 {
                // Ground level: nothing further below can occlude.
                self.covered.push(coord);
            } else {
                let front = coord.shifted(0, 0, -1).neighbour(Direction::Front);
                if storage.has_cell(front) {
                    self.covered.push(front);
                }
            }
        }
        &self.covered
    }

    /// The covering cells produced by the last [`Self::compute_covered`]
    /// call. Same validity contract: reused buffer, do not retain.
    #[must_use]
    pub fn covered(&self) -> &[Coordinate] {
        &self.covered
    }
}

/// Zero-argument constructor producing a fresh unspawned entity variant.
pub type EntityFactory = Box<dyn Fn() -> Entity + Send + Sync>;

/// Registry mapping type names to entity factories.
///
/// Built explicitly during engine initialization and passed to spawn and
/// deserialization call sites; registration overwrites on duplicate names and
/// nothing is ever removed.
#[derive(Default)]
pub struct EntityRegistry {
    entries: HashMap<String, EntityFactory>,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the engine's built-in entity types.
    #[must_use]
    pub fn with_engine_entities() -> Self {
        let mut registry = Self::new();
        registry.register("explosion", || {
            let mut entity = Entity::new(ENTITY_ID_HIDDEN, 0);
            entity.set_kind(EntityKind::Explosion);
            entity.set_name("explosion");
            entity.set_save_to_disk(false);
            entity.set_indestructible(true);
            entity
        });
        registry.register("benchmark ball", || {
            let mut entity = Entity::new(1, 0);
            entity.set_kind(EntityKind::BenchmarkBall);
            entity.set_name("benchmark ball");
            entity.set_save_to_disk(false);
            entity
        });
        registry
    }

    /// Registers an entity factory under `name`, overwriting any previous
    /// registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Entity + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Box::new(factory));
    }

    /// Retrieve the factory registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&EntityFactory> {
        self.entries.get(name)
    }

    /// Construct a fresh unspawned entity of the named type.
    #[must_use]
    pub fn construct(&self, name: &str) -> Option<Entity> {
        self.entries.get(name).map(|factory| factory())
    }

    /// Returns whether a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterate over the registered type names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Streaming backend materializing chunk content out-of-band.
///
/// The world never awaits a load; residency is re-checked lazily on the next
/// position-dependent access and completions arrive via
/// [`World::commit_chunk`].
pub trait ChunkLoader: Send {
    /// Begin loading the chunk at `index`.
    fn load(&mut self, index: ChunkIndex);
}

/// No-op streaming backend.
#[derive(Debug, Default)]
pub struct NullLoader;

impl ChunkLoader for NullLoader {
    fn load(&mut self, _index: ChunkIndex) {}
}

/// Audio playback collaborator.
pub trait AudioSink: Send {
    /// Play a sound effect positioned in game space.
    fn play(&mut self, sound: &str, at: Point);
}

/// No-op audio collaborator.
#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn play(&mut self, _sound: &str, _at: Point) {}
}

/// Append-only diagnostic log for non-fatal conditions, bounded to the
/// configured capacity by dropping the oldest lines.
#[derive(Debug)]
pub struct Console {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Console {
    /// Construct a console retaining at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a diagnostic line, mirrored to the tracing subscriber.
    pub fn add(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!(target: "tessera::console", "{entry}");
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Iterate over the retained lines, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// The most recently appended line.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The map collaborator: owns the live entity set, chunk residency, and the
/// staged tick pipeline.
pub struct World {
    config: WorldConfig,
    tick: Tick,
    rng: SmallRng,
    entities: SlotMap<EntityId, Entity>,
    resident: HashMap<ChunkIndex, Chunk>,
    loading: HashSet<ChunkIndex>,
    loader: Box<dyn ChunkLoader>,
    audio: Box<dyn AudioSink>,
    console: Console,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("entity_count", &self.entities.len())
            .field("resident_chunks", &self.resident.len())
            .field("loading_chunks", &self.loading.len())
            .finish()
    }
}

impl World {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_collaborators(config, Box::new(NullLoader), Box::new(NullAudio))
    }

    /// Instantiate a new world wired to the given streaming and audio
    /// collaborators.
    pub fn with_collaborators(
        config: WorldConfig,
        loader: Box<dyn ChunkLoader>,
        audio: Box<dyn AudioSink>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let console = Console::new(config.console_capacity);
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            entities: SlotMap::with_key(),
            resident: HashMap::new(),
            loading: HashSet::new(),
            loader,
            audio,
            console,
            history,
        })
    }

    /// Replace the streaming backend.
    pub fn set_loader(&mut self, loader: Box<dyn ChunkLoader>) {
        self.loader = loader;
    }

    /// Replace the audio collaborator.
    pub fn set_audio(&mut self, audio: Box<dyn AudioSink>) {
        self.audio = audio;
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// The diagnostic console.
    #[must_use]
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Mutable access to the diagnostic console.
    #[must_use]
    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Vertical extent of the map in game units.
    #[must_use]
    pub fn world_height(&self) -> f32 {
        self.config.grid.world_height_units()
    }

    /// Admit an entity to the live set, unspawned. Returns its handle.
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        self.entities.insert(entity)
    }

    /// Remove an entity by handle, returning it.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(id)
    }

    /// Number of live entities (spawned or not, disposed-but-unswept
    /// included).
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns whether a handle refers to a live entity.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Borrow an entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Mutably borrow an entity.
    #[must_use]
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Iterate over the live entity set.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Handles of every live entity of the given variant.
    #[must_use]
    pub fn entities_of_kind(&self, kind: &EntityKind) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.kind == *kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Handles of placed entities eligible for the external save layer.
    #[must_use]
    pub fn saved_entities(&self) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, entity)| entity.save_to_disk && entity.has_position())
            .map(|(id, _)| id)
            .collect()
    }

    /// Let an entity spawn: bind it to `point` and couple it to the streamed
    /// map, requesting the owning chunk when it is not resident.
    ///
    /// A second spawn is rejected with a console diagnostic and no state
    /// change. Returns whether the entity was newly placed.
    pub fn spawn(&mut self, id: EntityId, point: Point) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if entity.position.is_some() {
            let message = format!("{} is already spawned.", entity.name());
            self.console.add(message);
            return false;
        }
        entity.position = Some(point);
        if let Some(shadow) = entity.shadow.as_deref_mut()
            && !shadow.has_position()
        {
            shadow.position = Some(point);
        }
        if !self.is_in_memory_area(id) {
            self.request_chunk(id);
        }
        true
    }

    /// True if the entity sits on a chunk held in memory.
    #[must_use]
    pub fn is_in_memory_area(&self, id: EntityId) -> bool {
        self.entities
            .get(id)
            .and_then(|entity| entity.position)
            .is_some_and(|position| {
                let index = position.to_coord().chunk_index(&self.config.grid);
                self.resident.contains_key(&index)
            })
    }

    /// Request the chunk at the entity's position from the streaming backend.
    ///
    /// At most one request per chunk index is outstanding from this path: a
    /// resident or already-loading chunk issues nothing. Returns whether a
    /// new request went out.
    pub fn request_chunk(&mut self, id: EntityId) -> bool {
        let Some((name, position)) = self
            .entities
            .get(id)
            .and_then(|entity| entity.position.map(|position| (entity.name.clone(), position)))
        else {
            return false;
        };
        let index = position.to_coord().chunk_index(&self.config.grid);
        if self.resident.contains_key(&index) || self.loading.contains(&index) {
            return false;
        }
        self.console
            .add(format!("Entity {name} requested chunk {},{}", index.x, index.y));
        self.load_chunk(index)
    }

    /// Begin loading the chunk at `index` unless it is resident or already
    /// in flight. Returns whether a request was issued.
    pub fn load_chunk(&mut self, index: ChunkIndex) -> bool {
        if self.resident.contains_key(&index) || self.loading.contains(&index) {
            return false;
        }
        self.loading.insert(index);
        self.loader.load(index);
        true
    }

    /// Whether a load for the chunk index is currently in flight.
    #[must_use]
    pub fn is_loading(&self, index: ChunkIndex) -> bool {
        self.loading.contains(&index)
    }

    /// Whether the chunk at `index` is held in memory.
    #[must_use]
    pub fn is_resident(&self, index: ChunkIndex) -> bool {
        self.resident.contains_key(&index)
    }

    /// Deliver a chunk produced by the streaming backend, clearing any
    /// pending load for its index.
    pub fn commit_chunk(&mut self, chunk: Chunk) {
        let index = chunk.index();
        self.loading.remove(&index);
        self.resident.insert(index, chunk);
    }

    /// Borrow a resident chunk.
    #[must_use]
    pub fn resident_chunk(&self, index: ChunkIndex) -> Option<&Chunk> {
        self.resident.get(&index)
    }

    /// Whether the map blocks movement at the cell containing `point`.
    /// Cells outside the resident area report `false`.
    #[must_use]
    pub fn is_obstacle_at(&self, point: Point) -> bool {
        let coord = point.to_coord();
        let index = coord.chunk_index(&self.config.grid);
        self.resident
            .get(&index)
            .is_some_and(|chunk| chunk.is_obstacle(coord))
    }

    /// Is the entity laying or standing on the ground? `false` when it has
    /// no position or floats above the map.
    #[must_use]
    pub fn is_on_ground(&self, id: EntityId) -> bool {
        let Some(position) = self.entities.get(id).and_then(|entity| entity.position) else {
            return false;
        };
        if position.z <= 0.0 {
            // Under the map floor counts as grounded.
            return true;
        }
        if position.z < self.world_height() {
            let probe = Point::new(position.x, position.y, position.z - 1.0);
            self.is_obstacle_at(probe)
        } else {
            false
        }
    }

    /// Every live entity colliding with `id`, the probe excluded.
    #[must_use]
    pub fn colliding_entities(&self, id: EntityId) -> Vec<EntityId> {
        let mut hits = Vec::with_capacity(COLLISION_RESULT_HINT);
        let Some(probe) = self.entities.get(id) else {
            return hits;
        };
        for (other_id, other) in &self.entities {
            if other_id != id && probe.collides_with(other) {
                hits.push(other_id);
            }
        }
        hits
    }

    /// Colliding entities restricted to a runtime variant. O(n) over the
    /// live set, the obstacle flag is ignored.
    #[must_use]
    pub fn colliding_entities_of_kind(&self, id: EntityId, kind: &EntityKind) -> Vec<EntityId> {
        let mut hits = Vec::with_capacity(COLLISION_RESULT_HINT);
        let Some(probe) = self.entities.get(id) else {
            return hits;
        };
        for (other_id, other) in &self.entities {
            if other_id != id && other.kind == *kind && probe.collides_with(other) {
                hits.push(other_id);
            }
        }
        hits
    }

    /// Apply damage to an entity, playing a cooldown-gated sound from its
    /// damage pool. Indestructible entities are unaffected; a drained entity
    /// is floored at zero health.
    pub fn damage(&mut self, id: EntityId, value: f32) {
        let Some(entity) = self.entities.get_mut(id) else {
            return;
        };
        if entity.indestructible {
            return;
        }
        if entity.health > 0.0 {
            if !entity.damage_sounds.is_empty() && entity.sound_cooldown <= 0.0 {
                let pick = self.rng.random_range(0..entity.damage_sounds.len());
                if let Some(at) = entity.position {
                    self.audio.play(&entity.damage_sounds[pick], at);
                }
                entity.sound_cooldown = self.config.sound_cooldown_ms;
            }
            entity.set_health(entity.health - value);
        } else {
            entity.set_health(0.0);
        }
    }

    /// Heal an entity through the clamped setter. No-op at full health and
    /// for indestructible entities.
    pub fn heal(&mut self, id: EntityId, value: f32) {
        if let Some(entity) = self.entities.get_mut(id) {
            if entity.indestructible {
                return;
            }
            if entity.health < MAX_HEALTH {
                entity.set_health(entity.health + value);
            }
        }
    }

    /// Advance every placed entity: animations run on the entity's effective
    /// delta, the sound cooldown always decays on the wall-clock delta, and
    /// drained destructible entities transition to pending disposal.
    fn stage_update(&mut self, dt: f32, raw_dt: f32) {
        for (_, entity) in self.entities.iter_mut() {
            if entity.position.is_none() {
                continue;
            }
            let effective = if entity.use_raw_delta { raw_dt } else { dt };
            if let Some(animation) = entity.animation.as_mut() {
                entity.value = animation.advance(effective);
                if animation.is_finished() {
                    entity.animation = None;
                }
            }
            if entity.health <= 0.0 && !entity.indestructible {
                entity.dispose();
            }
            if entity.sound_cooldown > 0.0 {
                entity.sound_cooldown -= raw_dt;
            }
        }
    }

    /// Physically remove every dispose-flagged entity from the live set,
    /// returning how many were swept.
    pub fn sweep_disposed(&mut self) -> usize {
        let before = self.entities.len();
        self.entities
            .retain(|_, entity| !entity.should_be_disposed());
        before - self.entities.len()
    }

    /// Execute one simulation tick returning emitted events.
    ///
    /// `dt` is the scaled simulation delta, `raw_dt` the wall-clock delta;
    /// both in milliseconds.
    pub fn step(&mut self, dt: f32, raw_dt: f32) -> TickEvents {
        let next_tick = self.tick.next();
        self.stage_update(dt, raw_dt);
        let disposed = self.sweep_disposed();
        self.tick = next_tick;
        let summary = TickSummary {
            tick: next_tick,
            entity_count: self.entities.len(),
            disposed,
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        TickEvents {
            tick: next_tick,
            disposed,
        }
    }
}

use std::sync::{Arc, Mutex};

use tessera_core::{
    AudioSink, ChunkLoader, Entity, EntityKind, EntityRegistry, KeyframeAnimation, MAX_HEALTH,
    Tick, World, WorldConfig,
};
use tessera_grid::{CELL_EDGE_LEN, Chunk, ChunkIndex, Coordinate, Point, RenderStorage};

#[derive(Clone, Default)]
struct CountingLoader {
    requests: Arc<Mutex<Vec<ChunkIndex>>>,
}

impl ChunkLoader for CountingLoader {
    fn load(&mut self, index: ChunkIndex) {
        self.requests.lock().expect("loader lock").push(index);
    }
}

#[derive(Clone, Default)]
struct CountingAudio {
    played: Arc<Mutex<Vec<(String, Point)>>>,
}

impl AudioSink for CountingAudio {
    fn play(&mut self, sound: &str, at: Point) {
        self.played
            .lock()
            .expect("audio lock")
            .push((sound.to_string(), at));
    }
}

struct SolidFloor;

impl RenderStorage for SolidFloor {
    fn has_cell(&self, coord: Coordinate) -> bool {
        coord.z >= 0 && coord.z < 2
    }
}

fn test_world() -> (World, Arc<Mutex<Vec<ChunkIndex>>>, Arc<Mutex<Vec<(String, Point)>>>) {
    let loader = CountingLoader::default();
    let audio = CountingAudio::default();
    let requests = Arc::clone(&loader.requests);
    let played = Arc::clone(&audio.played);
    let config = WorldConfig {
        rng_seed: Some(0xDEADBEEF),
        ..WorldConfig::default()
    };
    let world = World::with_collaborators(config, Box::new(loader), Box::new(audio))
        .expect("world");
    (world, requests, played)
}

#[test]
fn entity_lifecycle_runs_end_to_end() {
    let (mut world, requests, played) = test_world();

    let mut registry = EntityRegistry::with_engine_entities();
    registry.register("crate", || {
        let mut entity = Entity::new(4, 0);
        entity.set_kind(EntityKind::External("crate".into()));
        entity.set_name("crate");
        entity.set_obstacle(true);
        entity.set_damage_sounds(vec!["wood_crack".into()]);
        entity
    });

    let id = world.insert(registry.construct("crate").expect("crate"));
    assert!(!world.entity(id).expect("crate").has_position());

    // Spawning couples the entity to the streamed map.
    let point = Point::new(32.0, 32.0, CELL_EDGE_LEN + 0.5);
    assert!(world.spawn(id, point));
    assert!(world.entity(id).expect("crate").has_position());
    assert_eq!(
        requests.lock().expect("loader lock").as_slice(),
        &[ChunkIndex::new(0, 0)]
    );

    // The load completes out-of-band with a solid block under the entity.
    let mut chunk = Chunk::new(ChunkIndex::new(0, 0), &world.config().grid);
    chunk.set_block(Coordinate::new(0, 0, 0), 1);
    world.commit_chunk(chunk);
    assert!(world.is_in_memory_area(id));
    assert!(world.is_on_ground(id));

    // Damage plays the pool sound at the entity position and drains health.
    world.damage(id, 40.0);
    world.damage(id, 70.0);
    let entity = world.entity(id).expect("crate");
    assert_eq!(entity.health(), 0.0);
    {
        let played = played.lock().expect("audio lock");
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].0, "wood_crack");
        assert_eq!(played[0].1, point);
    }

    // The next tick disposes and sweeps the drained entity.
    let events = world.step(16.0, 16.0);
    assert_eq!(events.tick, Tick(1));
    assert_eq!(events.disposed, 1);
    assert!(!world.contains(id));
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn chunk_requests_stay_deduplicated_across_entities() {
    let (mut world, requests, _) = test_world();

    let chunk_span_x = world.config().grid.chunk_cells_x as f32 * CELL_EDGE_LEN;
    let ids: Vec<_> = (0..8)
        .map(|i| {
            let id = world.insert(Entity::new(1, 0));
            world.spawn(id, Point::new(i as f32, i as f32, 0.0));
            id
        })
        .collect();

    // Eight entities in the same unloaded chunk, one request.
    assert_eq!(requests.lock().expect("loader lock").len(), 1);
    for id in &ids {
        assert!(!world.is_in_memory_area(*id));
    }

    // Re-requesting while the load is in flight issues nothing.
    for id in &ids {
        assert!(!world.request_chunk(*id));
    }
    assert_eq!(requests.lock().expect("loader lock").len(), 1);

    // A neighbouring chunk is its own request.
    let far = world.insert(Entity::new(2, 0));
    world.spawn(far, Point::new(chunk_span_x + 1.0, 0.0, 0.0));
    assert_eq!(
        requests.lock().expect("loader lock").as_slice(),
        &[ChunkIndex::new(0, 0), ChunkIndex::new(1, 0)]
    );

    // After the commit the chunk is resident and stays quiet.
    world.commit_chunk(Chunk::new(ChunkIndex::new(0, 0), &world.config().grid));
    for id in &ids {
        assert!(!world.request_chunk(*id));
        assert!(world.is_in_memory_area(*id));
    }
    assert_eq!(requests.lock().expect("loader lock").len(), 2);
}

#[test]
fn health_stays_in_domain_under_arbitrary_writes() {
    let (mut world, _, _) = test_world();
    let id = world.insert(Entity::new(1, 0));
    world.spawn(id, Point::new(0.0, 0.0, 0.0));

    let writes = [250.0, -40.0, 12.5, 1e9, -1e9, 0.1, 99.9, 100.0];
    for value in writes {
        world.entity_mut(id).expect("entity").set_health(value);
        let health = world.entity(id).expect("entity").health();
        assert!((0.0..=MAX_HEALTH).contains(&health), "health {health} escaped domain");
    }

    for value in writes {
        world.damage(id, value.abs());
        let health = world.entity(id).expect("entity").health();
        assert!((0.0..=MAX_HEALTH).contains(&health));
        world.heal(id, value.abs());
        let health = world.entity(id).expect("entity").health();
        assert!((0.0..=MAX_HEALTH).contains(&health));
    }
}

#[test]
fn paint_order_matches_render_storage_residency() {
    let (mut world, _, _) = test_world();
    let storage = SolidFloor;

    // Standing on the ground: the supporting cell itself, exactly once.
    let grounded = world.insert(Entity::new(1, 0));
    world.spawn(grounded, Point::new(96.0, 96.0, CELL_EDGE_LEN * 1.5));
    let covered = world
        .entity_mut(grounded)
        .expect("entity")
        .compute_covered(&storage);
    assert_eq!(covered, &[Coordinate::new(1, 1, 0)]);

    // Airborne: at most the stepped front neighbour.
    let airborne = world.insert(Entity::new(2, 0));
    world.spawn(airborne, Point::new(96.0, 96.0, CELL_EDGE_LEN * 3.5));
    let covered = world
        .entity_mut(airborne)
        .expect("entity")
        .compute_covered(&storage);
    assert_eq!(covered, &[Coordinate::new(1, 2, 1)]);

    // High above the loaded volume the neighbour is absent: empty set.
    let soaring = world.insert(Entity::new(3, 0));
    world.spawn(soaring, Point::new(96.0, 96.0, CELL_EDGE_LEN * 5.5));
    let covered = world
        .entity_mut(soaring)
        .expect("entity")
        .compute_covered(&storage);
    assert!(covered.is_empty());

    // The buffer is recomputed per call on the same entity.
    world
        .entity_mut(airborne)
        .expect("entity")
        .set_position(Point::new(96.0, 96.0, CELL_EDGE_LEN * 1.5));
    let covered = world
        .entity_mut(airborne)
        .expect("entity")
        .compute_covered(&storage);
    assert_eq!(covered, &[Coordinate::new(1, 1, 0)]);
}

#[test]
fn seeded_worlds_tick_deterministically() {
    let build = || {
        let config = WorldConfig {
            rng_seed: Some(0xBEEF),
            ..WorldConfig::default()
        };
        let mut world = World::new(config).expect("world");
        for i in 0..4 {
            let mut entity = Entity::new(i as i8 + 1, 0);
            entity.set_animation(Box::new(KeyframeAnimation::new(
                vec![10.0, 20.0, 30.0],
                true,
            )));
            let id = world.insert(entity);
            world.spawn(id, Point::new(i as f32 * 10.0, 0.0, 0.0));
        }
        world
    };

    let mut world_a = build();
    let mut world_b = build();
    for _ in 0..8 {
        let events_a = world_a.step(16.0, 16.0);
        let events_b = world_b.step(16.0, 16.0);
        assert_eq!(events_a, events_b);
    }
    assert_eq!(world_a.tick(), Tick(8));

    let values_a: Vec<u8> = world_a.entities().map(|(_, e)| e.value()).collect();
    let values_b: Vec<u8> = world_b.entities().map(|(_, e)| e.value()).collect();
    assert_eq!(values_a, values_b);
}

#[test]
fn explosion_plays_out_and_disposes_itself() {
    let (mut world, _, _) = test_world();
    let registry = EntityRegistry::with_engine_entities();

    let mut explosion = registry.construct("explosion").expect("explosion");
    explosion.set_animation(Box::new(KeyframeAnimation::new(vec![20.0, 20.0], false)));
    let id = world.insert(explosion);
    world.spawn(id, Point::new(0.0, 0.0, 0.0));

    world.step(25.0, 25.0);
    assert!(world.entity(id).expect("explosion").has_animation());
    world.step(25.0, 25.0);
    assert!(!world.entity(id).expect("explosion").has_animation());

    // Indestructible, so only explicit disposal removes it.
    world.entity_mut(id).expect("explosion").dispose();
    let events = world.step(16.0, 16.0);
    assert_eq!(events.disposed, 1);
    assert!(!world.contains(id));
}

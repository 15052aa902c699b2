use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codec::{
    apply_baseline, apply_diff, CodecLimits, EntityGuid, FieldValue, Holder, IdentityClass,
};
use demo_schema::{
    item_guid, player_guid, player_schema, PlayerSeed, DEMO_REALM, EQUIPMENT_SLOTS, MAX_LEVEL,
    MAX_STACK, POS_MAX, POS_MIN,
};
use repgraph::{
    ObserverGrants, ObserverId, ObserverUpdate, ReplicationConfig, ReplicationGraph, TickStats,
};
use schema::{HolderSchema, Visibility};
use serde::Serialize;

const VEL_MIN: i64 = -400;
const VEL_MAX: i64 = 400;
const MAX_AURAS: usize = 40;
const MAX_INVENTORY: usize = 64;
const MAX_DECOR: usize = 48;

#[derive(Parser)]
#[command(
    name = "demo-sim",
    version,
    about = "Deterministic replication simulation over the demo player schema"
)]
struct Cli {
    /// Number of simulated players. Each player is also an observer.
    #[arg(long, default_value_t = 16)]
    players: u32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Players per party.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    party_size: u32,
    /// Interest cell edge, in quantized position units.
    #[arg(long, default_value_t = 20_000, value_parser = clap::value_parser!(i64).range(1..))]
    cell_size: i64,
    /// Optional burst event cadence.
    #[arg(long)]
    burst_every: Option<u32>,
    /// Output directory for the schema and summary.
    #[arg(long, default_value = "captures")]
    out_dir: PathBuf,
    /// Fail if p95 per-tick update bytes exceed this value.
    #[arg(long)]
    max_p95_update_bytes: Option<u64>,
    /// Fail if average per-tick update bytes exceed this value.
    #[arg(long)]
    max_avg_update_bytes: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if cli.players == 0 {
        anyhow::bail!("at least one player is required");
    }
    let schema = player_schema().context("build player schema")?;
    let limits = CodecLimits::default();

    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;
    write_schema_json(&cli.out_dir, &schema)?;

    let mut rng = Rng::new(cli.seed);
    let mut world = World::spawn(&schema, cli.players, cli.party_size, &mut rng)?;
    let mut clients: BTreeMap<ObserverId, Replicas> = BTreeMap::new();
    let mut summary = Summary::new(&cli);

    for tick in 1..=cli.ticks {
        if tick > 1 {
            world.step(&mut rng, tick, cli.burst_every);
        }
        let interest = Interest::capture(&world.graph, cli.party_size, cli.cell_size);

        let mut tick_bytes = 0u64;
        for observer in world.graph.observers() {
            let update = world
                .graph
                .build_observer_update(observer, &interest)
                .with_context(|| format!("build update for {observer} at tick {tick}"))?;
            tick_bytes += update.payload_bytes() as u64;
            summary.record_update(&update);
            clients
                .entry(observer)
                .or_default()
                .apply(&schema, &update, &limits)
                .with_context(|| format!("apply update for {observer} at tick {tick}"))?;
        }
        summary.push_tick(tick, tick_bytes, world.graph.tick_stats());
        verify_replicas(&world.graph, &clients)
            .with_context(|| format!("verify replicas at tick {tick}"))?;
        world.graph.clear_changes();
    }

    summary.finalize();
    log::info!(
        "{} ticks: {} create bytes, {} update bytes, p95 {} bytes/tick",
        summary.ticks,
        summary.create_bytes_total,
        summary.update_bytes_total,
        summary.p95_update_bytes
    );
    summary.assert_budgets(cli.max_p95_update_bytes, cli.max_avg_update_bytes)?;
    write_summary_json(&cli.out_dir, &summary)?;
    write_snapshot_json(&cli.out_dir, &world.graph)?;

    Ok(())
}

fn write_schema_json(out_dir: &Path, schema: &HolderSchema) -> Result<()> {
    let path = out_dir.join("schema.json");
    let contents = serde_json::to_string_pretty(schema).context("serialize schema")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Final authoritative state of every player, keyed by entity.
fn write_snapshot_json(out_dir: &Path, graph: &ReplicationGraph) -> Result<()> {
    let players: BTreeMap<String, &Holder> = graph
        .entities()
        .map(|(entity, holder)| (entity.to_string(), holder))
        .collect();
    let path = out_dir.join("snapshot.json");
    let contents = serde_json::to_string_pretty(&players).context("serialize snapshot")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn observer_of(entity: EntityGuid) -> Option<ObserverId> {
    u32::try_from(entity.counter()).ok().map(ObserverId)
}

/// Client-side replicas held by one observer.
#[derive(Default)]
struct Replicas {
    entities: BTreeMap<EntityGuid, Holder>,
}

impl Replicas {
    fn apply(
        &mut self,
        schema: &Arc<HolderSchema>,
        update: &ObserverUpdate,
        limits: &CodecLimits,
    ) -> Result<()> {
        for entity in &update.destroys {
            if self.entities.remove(entity).is_none() {
                anyhow::bail!("destroy for unknown {entity}");
            }
        }
        for create in &update.creates {
            let mut replica = Holder::new(Arc::clone(schema));
            apply_baseline(&mut replica, &create.bytes, limits)
                .with_context(|| format!("baseline for {}", create.entity))?;
            self.entities.insert(create.entity, replica);
        }
        for diff in &update.updates {
            let replica = self
                .entities
                .get_mut(&diff.entity)
                .with_context(|| format!("diff for unknown {}", diff.entity))?;
            apply_diff(replica, &diff.bytes, limits)
                .with_context(|| format!("diff for {}", diff.entity))?;
        }
        Ok(())
    }
}

/// Owners see every replicated field; nobody else sees owner-only fields.
fn verify_replicas(
    graph: &ReplicationGraph,
    clients: &BTreeMap<ObserverId, Replicas>,
) -> Result<()> {
    for (entity, holder) in graph.entities() {
        let owner = observer_of(entity).with_context(|| format!("no owner for {entity}"))?;
        let replica = clients
            .get(&owner)
            .and_then(|replicas| replicas.entities.get(&entity))
            .with_context(|| format!("{owner} holds no replica of {entity}"))?;
        for (key, field) in holder.schema().entries() {
            if field.is_replicated() && holder.field(key) != replica.field(key) {
                anyhow::bail!("{owner} replica of {entity} diverged at `{}`", field.name);
            }
        }
    }

    for (observer, replicas) in clients {
        for (entity, replica) in &replicas.entities {
            if observer_of(*entity) == Some(*observer) {
                continue;
            }
            let gold_hidden = replica.get("gold") == Some(&FieldValue::UInt(0));
            let inventory_hidden = replica
                .dynamic("inventory")
                .is_some_and(|inventory| inventory.is_empty());
            if !gold_hidden || !inventory_hidden {
                anyhow::bail!("{observer} received owner-only fields of {entity}");
            }
        }
    }
    Ok(())
}

/// Relevance snapshot taken once per tick.
///
/// Players see themselves with every tag, their party with party and public
/// tags, and strangers in neighbouring interest cells with public tags only.
struct Interest {
    cells: Vec<(i64, i64)>,
    party_size: usize,
}

impl Interest {
    fn capture(graph: &ReplicationGraph, party_size: u32, cell_size: i64) -> Self {
        let mut cells = vec![(0, 0); graph.entity_count()];
        for (entity, holder) in graph.entities() {
            let Some(index) = player_index(entity) else {
                continue;
            };
            let position = holder.nested("position");
            let axis = |name: &str| {
                position
                    .and_then(|p| p.get(name))
                    .and_then(FieldValue::as_i64)
                    .unwrap_or(0)
            };
            if let Some(cell) = cells.get_mut(index) {
                *cell = (
                    axis("x").div_euclid(cell_size),
                    axis("y").div_euclid(cell_size),
                );
            }
        }
        Self {
            cells,
            party_size: party_size as usize,
        }
    }
}

impl ObserverGrants for Interest {
    fn grants(&self, observer: ObserverId, entity: EntityGuid) -> Option<Visibility> {
        let viewer = (observer.0 as usize).checked_sub(1)?;
        let target = player_index(entity)?;
        if viewer == target {
            return Some(Visibility::ALL);
        }
        if viewer / self.party_size == target / self.party_size {
            return Some(Visibility::PARTY_MEMBER | Visibility::ANY_OBSERVER);
        }
        let (a, b) = (self.cells.get(viewer)?, self.cells.get(target)?);
        ((a.0 - b.0).abs() <= 1 && (a.1 - b.1).abs() <= 1).then_some(Visibility::ANY_OBSERVER)
    }
}

fn player_index(entity: EntityGuid) -> Option<usize> {
    if entity.class() != Some(IdentityClass::Player) {
        return None;
    }
    usize::try_from(entity.counter()).ok()?.checked_sub(1)
}

struct World {
    graph: ReplicationGraph,
    velocities: Vec<[i64; 3]>,
    next_item: u64,
}

impl World {
    fn spawn(
        schema: &Arc<HolderSchema>,
        players: u32,
        party_size: u32,
        rng: &mut Rng,
    ) -> Result<Self> {
        let mut graph = ReplicationGraph::new(ReplicationConfig::default_limits());
        let mut velocities = Vec::with_capacity(players as usize);
        for index in 0..players {
            let counter = u64::from(index) + 1;
            let seed = PlayerSeed {
                guid: player_guid(counter),
                name: format!("player-{counter:03}"),
                level: 1 + u64::from(rng.next_u32()) % MAX_LEVEL,
                position_q: [
                    rng.range_i64(POS_MIN / 2, POS_MAX / 2),
                    rng.range_i64(POS_MIN / 2, POS_MAX / 2),
                    rng.range_i64(-1_000, 1_000),
                ],
            };
            let mut player = seed.spawn(schema);
            let party = u64::from(index / party_size) + 1;
            player.set(
                "party",
                EntityGuid::realm_specific(IdentityClass::Party, DEMO_REALM, party),
            );
            graph
                .insert_entity(seed.guid, player)
                .with_context(|| format!("insert {}", seed.guid))?;
            graph.add_observer(ObserverId(index + 1));
            velocities.push([
                rng.range_i64(VEL_MIN, VEL_MAX),
                rng.range_i64(VEL_MIN, VEL_MAX),
                0,
            ]);
        }
        Ok(Self {
            graph,
            velocities,
            next_item: 0,
        })
    }

    fn step(&mut self, rng: &mut Rng, tick: u32, burst_every: Option<u32>) {
        let burst_now = burst_every.is_some_and(|every| every > 0 && tick % every == 0);
        for (index, velocity) in self.velocities.iter_mut().enumerate() {
            let Some(player) = self.graph.entity_mut(player_guid(index as u64 + 1)) else {
                continue;
            };
            move_player(player, velocity, rng);
            step_vitals(player, rng);
            step_auras(player, rng);
            step_inventory(player, rng, &mut self.next_item);
            if rng.roll(30) {
                let slot = rng.next_u32() as usize % usize::from(EQUIPMENT_SLOTS);
                player
                    .modify()
                    .set_at("equipment", slot, u64::from(rng.next_u32() % 100_000));
            }
            if burst_now {
                step_housing(player, rng);
                if index % 2 == 0 {
                    let guild = 1 + (u64::from(tick) + index as u64) % 3;
                    player.set(
                        "guild",
                        EntityGuid::realm_specific(IdentityClass::Guild, DEMO_REALM, guild),
                    );
                }
            }
            player.set("server_flags", u64::from(tick % 256));
        }
    }
}

fn uint(holder: &Holder, name: &str) -> u64 {
    holder.get(name).and_then(FieldValue::as_u64).unwrap_or(0)
}

fn move_player(player: &mut Holder, velocity: &mut [i64; 3], rng: &mut Rng) {
    let Some(mut position) = player.modify().nested("position") else {
        return;
    };
    for (axis, name) in ["x", "y", "z"].into_iter().enumerate() {
        if rng.roll(20) {
            velocity[axis] = clamp(velocity[axis] + rng.range_i64(-50, 50), VEL_MIN, VEL_MAX);
        }
        let current = position
            .get(name)
            .and_then(FieldValue::as_i64)
            .unwrap_or(0);
        let next = current + velocity[axis];
        if next <= POS_MIN || next >= POS_MAX {
            velocity[axis] = -velocity[axis];
        }
        position.set(name, clamp(next, POS_MIN, POS_MAX));
    }
}

fn step_vitals(player: &mut Holder, rng: &mut Rng) {
    if rng.roll(4) {
        let health = uint(player, "health");
        let max_health = uint(player, "max_health");
        let next = if rng.roll(2) {
            health.saturating_sub(1 + u64::from(rng.next_u32() % 50))
        } else {
            (health + 20).min(max_health)
        };
        player.set("health", next);
    }
    if rng.roll(3) {
        player.set("power", u64::from(rng.next_u32() % 1_000));
    }
    if rng.roll(10) {
        let gold = uint(player, "gold");
        player.set("gold", gold + u64::from(rng.next_u32() % 100));
    }

    let level = uint(player, "level");
    if level < MAX_LEVEL && rng.roll(200) {
        let mut root = player.modify();
        root.set("level", level + 1);
        root.set("max_health", 100 + (level + 1) * 25);
        if let Some(mut stats) = root.nested("stats") {
            for stat in ["strength", "agility", "stamina", "intellect"] {
                let current = stats.get(stat).and_then(FieldValue::as_u64).unwrap_or(0);
                stats.set(stat, (current + 1).min(1_023));
            }
        }
    }
}

fn step_auras(player: &mut Holder, rng: &mut Rng) {
    let Some(mut auras) = player.modify().dynamic("auras") else {
        return;
    };
    if auras.len() < MAX_AURAS && rng.roll(8) {
        auras.push(u64::from(rng.next_u32() % 60_000));
    }
    if !auras.is_empty() && rng.roll(10) {
        let index = rng.next_u32() as usize % auras.len();
        auras.remove(index);
    }
}

fn step_inventory(player: &mut Holder, rng: &mut Rng, next_item: &mut u64) {
    let len = player.dynamic("inventory").map_or(0, |inv| inv.len());
    if len < MAX_INVENTORY && rng.roll(25) {
        *next_item += 1;
        let guid = item_guid(*next_item);
        let entry = u64::from(rng.next_u32() % 200_000);
        if let Some(mut inventory) = player.modify().dynamic("inventory") {
            let index = inventory.push_default();
            if let Some(mut item) = inventory.element(index) {
                item.set("guid", guid);
                item.set("entry", entry);
                item.set("count", 1u64);
                item.set("durability", 100u64);
            }
        }
    } else if len > 0 && rng.roll(15) {
        let index = rng.next_u32() as usize % len;
        let stack = 1 + u64::from(rng.next_u32()) % MAX_STACK;
        let item = player
            .modify()
            .dynamic("inventory")
            .and_then(|inventory| inventory.element(index));
        if let Some(mut item) = item {
            item.set("count", stack);
        }
    } else if len > 0 && rng.roll(40) {
        let index = rng.next_u32() as usize % len;
        if let Some(mut inventory) = player.modify().dynamic("inventory") {
            inventory.remove(index);
        }
    }
}

fn step_housing(player: &mut Holder, rng: &mut Rng) {
    let owned = player.optional("housing").is_some_and(|plot| plot.is_some());
    if owned && rng.roll(2) {
        if let Some(mut housing) = player.modify().optional("housing") {
            housing.remove();
        }
        return;
    }
    let Some(mut plot) = player
        .modify()
        .optional("housing")
        .and_then(|housing| housing.holder_mut())
    else {
        return;
    };
    if !owned {
        plot.set("plot_id", u64::from(rng.next_u32() % 4_096));
    }
    plot.set("rent_paid", rng.roll(2));
    if let Some(mut decor) = plot.dynamic("decor") {
        if decor.len() < MAX_DECOR {
            decor.push(u64::from(rng.next_u32() % 500_000));
        }
    }
}

fn clamp(value: i64, min: i64, max: i64) -> i64 {
    value.min(max).max(min)
}

struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.state >> 32) as u32
    }

    fn range_i64(&mut self, min: i64, max: i64) -> i64 {
        let span = (max - min).unsigned_abs().max(1) + 1;
        let value = u64::from(self.next_u32()) % span;
        min + value as i64
    }

    /// `true` with probability `1 / one_in`.
    fn roll(&mut self, one_in: u32) -> bool {
        self.next_u32() % one_in == 0
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    players: u32,
    ticks: u32,
    seed: u64,
    party_size: u32,
    burst_every: Option<u32>,
    create_count: u64,
    update_count: u64,
    destroy_count: u64,
    create_bytes_total: u64,
    update_bytes_total: u64,
    payloads_built: u64,
    payloads_reused: u64,
    avg_bytes_per_tick: u64,
    avg_update_bytes: u64,
    p95_update_bytes: u64,
    #[serde(skip)]
    tick_sizes: Vec<u64>,
}

impl Summary {
    fn new(cli: &Cli) -> Self {
        Self {
            players: cli.players,
            ticks: cli.ticks,
            seed: cli.seed,
            party_size: cli.party_size,
            burst_every: cli.burst_every,
            create_count: 0,
            update_count: 0,
            destroy_count: 0,
            create_bytes_total: 0,
            update_bytes_total: 0,
            payloads_built: 0,
            payloads_reused: 0,
            avg_bytes_per_tick: 0,
            avg_update_bytes: 0,
            p95_update_bytes: 0,
            tick_sizes: Vec::new(),
        }
    }

    fn record_update(&mut self, update: &ObserverUpdate) {
        self.create_count += update.creates.len() as u64;
        self.update_count += update.updates.len() as u64;
        self.destroy_count += update.destroys.len() as u64;
        self.create_bytes_total += update
            .creates
            .iter()
            .map(|payload| payload.bytes.len() as u64)
            .sum::<u64>();
        self.update_bytes_total += update
            .updates
            .iter()
            .map(|payload| payload.bytes.len() as u64)
            .sum::<u64>();
    }

    /// Records one tick. The first tick is all baselines and is left out of
    /// the per-tick distribution.
    fn push_tick(&mut self, tick: u32, bytes: u64, stats: TickStats) {
        self.payloads_built += stats.built as u64;
        self.payloads_reused += stats.reused as u64;
        if tick > 1 {
            self.tick_sizes.push(bytes);
        }
    }

    fn finalize(&mut self) {
        if self.ticks > 0 {
            self.avg_bytes_per_tick =
                (self.create_bytes_total + self.update_bytes_total) / u64::from(self.ticks);
        }
        if !self.tick_sizes.is_empty() {
            let total: u64 = self.tick_sizes.iter().sum();
            self.avg_update_bytes = total / self.tick_sizes.len() as u64;
            self.tick_sizes.sort_unstable();
            let idx = ((self.tick_sizes.len() as f64) * 0.95).ceil() as usize;
            let idx = idx.saturating_sub(1).min(self.tick_sizes.len() - 1);
            self.p95_update_bytes = self.tick_sizes[idx];
        }
    }

    fn assert_budgets(&self, max_p95: Option<u64>, max_avg: Option<u64>) -> Result<()> {
        if let Some(max_p95) = max_p95 {
            if self.p95_update_bytes > max_p95 {
                anyhow::bail!(
                    "p95 update bytes {} exceeds budget {}",
                    self.p95_update_bytes,
                    max_p95
                );
            }
        }
        if let Some(max_avg) = max_avg {
            if self.avg_update_bytes > max_avg {
                anyhow::bail!(
                    "avg update bytes {} exceeds budget {}",
                    self.avg_update_bytes,
                    max_avg
                );
            }
        }
        Ok(())
    }
}

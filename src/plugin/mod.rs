//! Bevy integration: scheduler resource, destruction events in, activations out.

use bevy::prelude::*;
use tracing::error;

use crate::config::ConnectivityConfig;
use crate::context::SimulationContext;
use crate::scheduler::{SchedulerReport, StructureId, StructureScheduler};
use crate::shard::ShardId;

#[derive(Default)]
pub struct ConnectivityPlugin {
    pub config: ConnectivityConfig,
}

impl ConnectivityPlugin {
    pub fn with_config(config: ConnectivityConfig) -> Self {
        Self { config }
    }
}

impl Plugin for ConnectivityPlugin {
    fn build(&self, app: &mut App) {
        let ctx = SimulationContext::headless(self.config.clone());
        app.insert_resource(StructureScheduler::new(ctx))
            .init_resource::<LastTick>()
            .add_event::<ShardRemoved>()
            .add_event::<ContactBroken>()
            .add_event::<ShardActivated>()
            .add_event::<StructureDissolved>()
            .add_systems(
                Update,
                (buffer_shard_removals, tick_structures, emit_activations).chain(),
            );
    }
}

/// A shard's backing object was destroyed
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRemoved {
    pub structure: StructureId,
    pub shard: ShardId,
}

/// Contact between two shards broke without destroying either
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactBroken {
    pub structure: StructureId,
    pub a: ShardId,
    pub b: ShardId,
}

/// A shard left its structure and now falls freely
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardActivated {
    pub structure: StructureId,
    pub shard: ShardId,
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureDissolved {
    pub structure: StructureId,
}

/// Report of the most recent scheduler tick
#[derive(Resource, Debug, Default)]
pub struct LastTick(pub SchedulerReport);

fn buffer_shard_removals(
    scheduler: Res<StructureScheduler>,
    mut removed: EventReader<ShardRemoved>,
    mut broken: EventReader<ContactBroken>,
) {
    let queue = scheduler.events();
    for event in removed.read() {
        queue.shard_removed(event.structure, event.shard);
    }
    for event in broken.read() {
        queue.edge_removed(event.structure, event.a, event.b);
    }
}

fn tick_structures(mut scheduler: ResMut<StructureScheduler>, mut last: ResMut<LastTick>) {
    last.0 = match scheduler.tick() {
        Ok(report) => report,
        Err(e) => {
            error!(target: "destruction_core::scheduler", error = %e, "structure tick failed");
            SchedulerReport::default()
        }
    };
}

fn emit_activations(
    mut last: ResMut<LastTick>,
    mut activated: EventWriter<ShardActivated>,
    mut dissolved: EventWriter<StructureDissolved>,
) {
    let report = std::mem::take(&mut last.0);
    for (structure, shard) in report.activated {
        activated.send(ShardActivated { structure, shard });
    }
    for structure in report.dissolved {
        dissolved.send(StructureDissolved { structure });
    }
}

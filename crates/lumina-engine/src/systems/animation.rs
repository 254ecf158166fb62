//! Advances every [`AnimationPlayback`] clip once per frame.
//!
//! Runs in `PrePhysics` so gameplay sees this frame's pose, and in `Paused`
//! so editor previews keep animating while the simulation is stopped.

use crate::components::AnimationPlayback;
use crate::context::SystemContext;
use crate::stage::{UpdatePriority, UpdatePriorityList, UpdateStage};
use crate::system::EntitySystem;

#[derive(Debug, Default)]
pub struct AnimationPlaybackSystem;

impl EntitySystem for AnimationPlaybackSystem {
    fn name(&self) -> &str {
        "animation_playback"
    }

    fn priority_list(&self) -> UpdatePriorityList {
        UpdatePriorityList::new()
            .with_priority(UpdateStage::PrePhysics, UpdatePriority::HIGH)
            .with_priority(UpdateStage::Paused, UpdatePriority::HIGH)
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        let dt = ctx.delta_time() as f32;
        let workers = ctx.workers();
        if let Some(clips) = ctx.registry_mut().storage_mut::<AnimationPlayback>() {
            workers.parallel_for(clips.values_mut(), |clip| clip.advance(dt));
        }
    }
}

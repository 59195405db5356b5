// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Client-side entity reconstruction.
//!
//! Each entity slot keeps the last few authoritative snapshots; at render
//! time the slot is resolved to a world transform by interpolating between
//! them, extrapolating past the newest one, and folding in the decaying
//! prediction error. Given identical snapshots, render time and options, the
//! resolved transform is bit-identical across runs.

use std::collections::HashSet;

use crate::common::{
    engine,
    math::{catmull_rom, Angles},
    task::TaskPool,
};

use cgmath::Vector3;
use chrono::Duration;
use slab::Slab;

pub const MAX_ENTITIES: usize = 1024;

/// Window over which a confirmed prediction error is faded out.
const PREDICTION_ERROR_FADE_MS: f32 = 100.0;

/// Duration of one alias animation frame (the legacy 10 Hz cadence).
pub const FRAME_DURATION_MS: i64 = 100;

/// Dynamic lights expire unless refreshed each frame.
pub const DLIGHT_CUTOFF: f32 = 16.0;

pub const MAX_DLIGHTS: usize = 32;
pub const MAX_LIGHTSTYLES: usize = 64;
pub const MAX_PARTICLES: usize = 4096;

/// One authoritative snapshot of an entity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EntityState {
    pub origin: Vector3<f32>,
    pub angles: Angles,
    pub velocity: Vector3<f32>,
    pub model_id: usize,
    pub skin_id: usize,
    pub frame_id: usize,
}

#[derive(Copy, Clone, Debug)]
struct TimedState {
    state: EntityState,
    time: Duration,
}

/// Per-slot interpolation behavior, sourced from the cvar surface once per
/// frame.
#[derive(Copy, Clone, Debug)]
pub struct LerpOptions {
    /// Allow positional extrapolation past the newest snapshot.
    pub extrapolate: bool,
    /// Hard cap on extrapolation, in milliseconds past the newest snapshot.
    pub extrapolate_max_ms: f32,
    /// Substitute Catmull-Rom for linear interpolation when enough history
    /// exists.
    pub cubic: bool,
    /// Keep advancing the animation clock across dropped packets.
    pub anim_continue: bool,
}

impl Default for LerpOptions {
    fn default() -> Self {
        LerpOptions {
            extrapolate: true,
            extrapolate_max_ms: 100.0,
            cubic: false,
            anim_continue: true,
        }
    }
}

/// An entity resolved to render state at a specific time.
#[derive(Copy, Clone, Debug)]
pub struct ResolvedEntity {
    pub origin: Vector3<f32>,
    pub angles: Angles,
    pub model_id: usize,
    pub skin_id: usize,
    pub frame_id: usize,
    pub old_frame_id: usize,
    /// Blend factor between `old_frame_id` and `frame_id`, in [0, 1].
    pub frontlerp: f32,
}

/// One client entity slot with its snapshot history.
#[derive(Clone, Debug)]
pub struct ClientEntity {
    // newest first: curr, prev, prev2
    curr: TimedState,
    prev: TimedState,
    prev2: Option<TimedState>,
    // a snapshot newer than the render time, when buffering runs ahead
    next: Option<TimedState>,

    old_frame_id: usize,
    anim_start: Duration,

    // prediction reconciliation
    prediction_error: Vector3<f32>,
    prediction_error_time: Option<Duration>,

    // set while the slot appeared in the latest snapshot
    present: bool,
}

impl ClientEntity {
    fn from_state(state: EntityState, time: Duration) -> ClientEntity {
        let timed = TimedState { state, time };
        ClientEntity {
            curr: timed,
            prev: timed,
            prev2: None,
            next: None,
            old_frame_id: state.frame_id,
            anim_start: time,
            prediction_error: Vector3::new(0.0, 0.0, 0.0),
            prediction_error_time: None,
            present: true,
        }
    }

    fn update(&mut self, state: EntityState, time: Duration) {
        if state.frame_id != self.curr.state.frame_id {
            self.old_frame_id = self.curr.state.frame_id;
            self.anim_start = time;
        }

        self.prev2 = Some(self.prev);
        self.prev = self.curr;
        self.curr = TimedState { state, time };
        self.next = None;
        self.present = true;
    }

    pub fn model_id(&self) -> usize {
        self.curr.state.model_id
    }

    /// Stashes a snapshot newer than the render time, giving the cubic
    /// interpolator a real forward control point instead of a projection.
    pub fn buffer_ahead(&mut self, state: EntityState, time: Duration) {
        self.next = Some(TimedState { state, time });
    }

    /// Records the divergence between a server-confirmed position and the
    /// position the client had predicted for the same input.
    pub fn set_prediction_error(&mut self, error: Vector3<f32>, time: Duration) {
        self.prediction_error = error;
        self.prediction_error_time = Some(time);
    }

    /// Resolves the slot to render state at time `t`.
    pub fn resolve(&self, t: Duration, opts: &LerpOptions) -> ResolvedEntity {
        let state = &self.curr.state;

        let origin = self.resolve_origin(t, opts) + self.prediction_offset(t);
        let angles = self.resolve_angles(t);
        let (frame_id, old_frame_id, frontlerp) = self.resolve_frame(t, opts);

        ResolvedEntity {
            origin,
            angles,
            model_id: state.model_id,
            skin_id: state.skin_id,
            frame_id,
            old_frame_id,
            frontlerp,
        }
    }

    fn lerp_alpha(&self, t: Duration) -> f32 {
        let span = engine::duration_to_f32(self.curr.time - self.prev.time);
        if span <= 0.0 {
            return 1.0;
        }
        engine::duration_to_f32(t - self.prev.time) / span
    }

    fn resolve_origin(&self, t: Duration, opts: &LerpOptions) -> Vector3<f32> {
        let alpha = self.lerp_alpha(t);

        if alpha <= 1.0 {
            let alpha = alpha.max(0.0);

            if opts.cubic {
                if let Some(prev2) = self.prev2 {
                    // virtual forward control point when no newer snapshot
                    // has been buffered
                    let p3 = match self.next {
                        Some(next) => next.state.origin,
                        None => {
                            self.curr.state.origin
                                + (self.curr.state.origin - self.prev.state.origin)
                        }
                    };

                    return catmull_rom(
                        prev2.state.origin,
                        self.prev.state.origin,
                        self.curr.state.origin,
                        p3,
                        alpha,
                    );
                }
            }

            return self.prev.state.origin
                + (self.curr.state.origin - self.prev.state.origin) * alpha;
        }

        if !opts.extrapolate || opts.extrapolate_max_ms <= 0.0 {
            return self.curr.state.origin;
        }

        // project along the last known velocity, capped at the cvar limit
        let dt = engine::duration_to_f32(t - self.curr.time)
            .min(opts.extrapolate_max_ms / 1000.0);
        self.curr.state.origin + self.curr.state.velocity * dt
    }

    fn resolve_angles(&self, t: Duration) -> Angles {
        let alpha = self.lerp_alpha(t).clamp(0.0, 1.0);
        self.prev.state.angles.lerp(&self.curr.state.angles, alpha)
    }

    fn resolve_frame(&self, t: Duration, opts: &LerpOptions) -> (usize, usize, f32) {
        let frame_dur = Duration::milliseconds(FRAME_DURATION_MS);
        let age = t - self.anim_start;

        if opts.anim_continue && age > frame_dur {
            // the server stopped delivering frame changes; keep the
            // animation clock running from the last known frame
            let skipped = (age.num_milliseconds() / FRAME_DURATION_MS) as usize;
            let frame = self.curr.state.frame_id + skipped;
            let within =
                Duration::milliseconds(age.num_milliseconds() % FRAME_DURATION_MS);
            let frontlerp = (engine::duration_to_f32(within)
                / engine::duration_to_f32(frame_dur))
            .clamp(0.0, 1.0);
            return (frame, frame.saturating_sub(1), frontlerp);
        }

        let frontlerp = (engine::duration_to_f32(age) / engine::duration_to_f32(frame_dur))
            .clamp(0.0, 1.0);
        (self.curr.state.frame_id, self.old_frame_id, frontlerp)
    }

    fn prediction_offset(&self, t: Duration) -> Vector3<f32> {
        let Some(error_time) = self.prediction_error_time else {
            return Vector3::new(0.0, 0.0, 0.0);
        };

        let age_ms = engine::duration_to_millis_f32(t - error_time);
        if age_ms >= PREDICTION_ERROR_FADE_MS {
            return Vector3::new(0.0, 0.0, 0.0);
        }

        self.prediction_error * (1.0 - age_ms / PREDICTION_ERROR_FADE_MS)
    }
}

/// All entity slots plus the transient effect state delivered alongside
/// snapshots: dynamic lights, lightstyles and particles.
pub struct EntityWorld {
    slots: Vec<Option<ClientEntity>>,
    dlights: Vec<Dlight>,
    lightstyles: LightStyles,
    particles: ParticleList,
}

impl EntityWorld {
    pub fn new() -> EntityWorld {
        EntityWorld {
            slots: vec![None; MAX_ENTITIES],
            dlights: Vec::with_capacity(MAX_DLIGHTS),
            lightstyles: LightStyles::new(),
            particles: ParticleList::with_capacity(MAX_PARTICLES),
        }
    }

    /// Applies one authoritative snapshot.
    ///
    /// Slots appearing for the first time are created; slots absent from the
    /// snapshot are destroyed.
    pub fn apply_snapshot<I>(&mut self, entities: I, time: Duration)
    where
        I: IntoIterator<Item = (usize, EntityState)>,
    {
        for slot in self.slots.iter_mut().flatten() {
            slot.present = false;
        }

        for (slot_id, state) in entities {
            if slot_id >= MAX_ENTITIES {
                warn!("snapshot entity {} out of range", slot_id);
                continue;
            }

            match &mut self.slots[slot_id] {
                Some(entity) => entity.update(state, time),
                None => self.slots[slot_id] = Some(ClientEntity::from_state(state, time)),
            }
        }

        // one missed snapshot destroys the entity
        for slot in &mut self.slots {
            if matches!(slot, Some(e) if !e.present) {
                *slot = None;
            }
        }
    }

    pub fn entity(&self, slot_id: usize) -> Option<&ClientEntity> {
        self.slots.get(slot_id).and_then(Option::as_ref)
    }

    pub fn entity_mut(&mut self, slot_id: usize) -> Option<&mut ClientEntity> {
        self.slots.get_mut(slot_id).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ClientEntity)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|e| (id, e)))
    }

    /// Resolves every live entity at render time `t`.
    pub fn resolve_all(&self, t: Duration, opts: &LerpOptions) -> Vec<(usize, ResolvedEntity)> {
        self.iter()
            .map(|(id, entity)| (id, entity.resolve(t, opts)))
            .collect()
    }

    /// Parallel variant: no slot reads or writes another slot, so the fan
    /// out is safe per entity.
    pub fn resolve_all_parallel(
        &self,
        pool: &TaskPool,
        t: Duration,
        opts: &LerpOptions,
    ) -> Vec<(usize, ResolvedEntity)> {
        let live: Vec<(usize, &ClientEntity)> = self.iter().collect();
        pool.map_indexed(live.len(), |i| {
            let (id, entity) = live[i];
            (id, entity.resolve(t, opts))
        })
    }

    pub fn clear_dlights(&mut self) {
        self.dlights.clear();
    }

    /// Adds a dynamic light for the current frame.
    pub fn add_dlight(&mut self, dlight: Dlight) {
        if self.dlights.len() < MAX_DLIGHTS {
            self.dlights.push(dlight);
        }
    }

    pub fn dlights(&self) -> &[Dlight] {
        &self.dlights
    }

    pub fn lightstyles(&self) -> &LightStyles {
        &self.lightstyles
    }

    pub fn lightstyles_mut(&mut self) -> &mut LightStyles {
        &mut self.lightstyles
    }

    pub fn particles(&self) -> &ParticleList {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleList {
        &mut self.particles
    }
}

impl Default for EntityWorld {
    fn default() -> Self {
        EntityWorld::new()
    }
}

/// Damps the full-screen blend when the server stops refreshing it.
///
/// The alpha decays linearly at `fade_per_second`; color is untouched so a
/// re-refresh next snapshot picks up where it left off.
pub fn fade_blend(v_blend: &mut [f32; 4], elapsed: Duration, fade_per_second: f32) {
    let dt = engine::duration_to_f32(elapsed).max(0.0);
    v_blend[3] = (v_blend[3] - fade_per_second * dt).max(0.0);
}

/// A transient point light. Lives one frame unless re-added.
#[derive(Copy, Clone, Debug)]
pub struct Dlight {
    pub origin: Vector3<f32>,
    pub radius: f32,
    pub color: [f32; 3],
}

/// The 64 lightstyle animation slots.
///
/// Each style is a string of levels 'a'..'z' ('a' dark, 'm' normal, 'z'
/// double bright) stepped at 10 Hz.
pub struct LightStyles {
    styles: [String; MAX_LIGHTSTYLES],
}

impl LightStyles {
    pub fn new() -> LightStyles {
        LightStyles {
            styles: std::array::from_fn(|_| String::new()),
        }
    }

    pub fn set(&mut self, index: usize, pattern: &str) {
        if index < MAX_LIGHTSTYLES {
            self.styles[index] = pattern.to_owned();
        }
    }

    /// Current brightness of a style, where 1.0 is the 'm' level.
    pub fn value(&self, index: usize, time: Duration) -> f32 {
        let style = match self.styles.get(index) {
            Some(s) if !s.is_empty() => s,
            _ => return 1.0,
        };

        let step = (time.num_milliseconds() / 100) as usize % style.len();
        let level = style.as_bytes()[step];
        (level.saturating_sub(b'a')) as f32 * 22.0 / 264.0
    }
}

impl Default for LightStyles {
    fn default() -> Self {
        LightStyles::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParticleKind {
    Default = 0,
    Fire = 1,
    Smoke = 2,
    Bubble = 3,
    Blood = 4,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Particle {
    pub kind: ParticleKind,
    pub origin: Vector3<f32>,
    pub velocity: Vector3<f32>,
    pub color: [f32; 3],
    pub alpha: f32,
    pub expire: Duration,
}

/// Pool of live particles.
pub struct ParticleList {
    slab: Slab<Particle>,
    live: HashSet<usize>,
}

impl ParticleList {
    pub fn with_capacity(capacity: usize) -> ParticleList {
        ParticleList {
            slab: Slab::with_capacity(capacity),
            live: HashSet::with_capacity(capacity / 8),
        }
    }

    /// Inserts a particle, dropping it silently when the pool is full.
    pub fn insert(&mut self, particle: Particle) -> bool {
        if self.slab.len() == self.slab.capacity() {
            return false;
        }

        let slab_id = self.slab.insert(particle);
        self.live.insert(slab_id);
        true
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Expires dead particles and applies `f` to the survivors.
    pub fn update<F>(&mut self, time: Duration, mut f: F)
    where
        F: FnMut(&mut Particle),
    {
        let slab = &mut self.slab;
        self.live.retain(|&part_id| {
            let retain = match slab.get_mut(part_id) {
                Some(part) => {
                    if part.expire <= time {
                        false
                    } else {
                        f(part);
                        true
                    }
                }
                None => false,
            };

            if !retain {
                slab.remove(part_id);
            }

            retain
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.slab.iter().map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Zero};

    fn state_at(origin: Vector3<f32>, velocity: Vector3<f32>) -> EntityState {
        EntityState {
            origin,
            angles: Angles::zero(),
            velocity,
            model_id: 1,
            skin_id: 0,
            frame_id: 0,
        }
    }

    fn two_snapshot_entity() -> ClientEntity {
        let mut entity = ClientEntity::from_state(
            state_at(Vector3::zero(), Vector3::new(200.0, 0.0, 0.0)),
            Duration::milliseconds(100),
        );
        entity.update(
            state_at(
                Vector3::new(100.0, 0.0, 0.0),
                Vector3::new(200.0, 0.0, 0.0),
            ),
            Duration::milliseconds(200),
        );
        entity
    }

    #[test]
    fn test_interpolation_exact_midpoint() {
        let entity = two_snapshot_entity();
        let resolved = entity.resolve(Duration::milliseconds(150), &LerpOptions::default());
        assert_eq!(resolved.origin, Vector3::new(50.0, 0.0, 0.0));
    }

    #[test]
    fn test_extrapolation_capped() {
        let entity = two_snapshot_entity();
        let opts = LerpOptions {
            extrapolate: true,
            extrapolate_max_ms: 50.0,
            ..Default::default()
        };
        // 60 ms past the newest snapshot, cap at 50 ms: 100 + 200 * 0.05
        let resolved = entity.resolve(Duration::milliseconds(260), &opts);
        assert_eq!(resolved.origin, Vector3::new(110.0, 0.0, 0.0));
    }

    #[test]
    fn test_extrapolate_max_zero_disables() {
        let entity = two_snapshot_entity();
        let opts = LerpOptions {
            extrapolate: true,
            extrapolate_max_ms: 0.0,
            ..Default::default()
        };
        let resolved = entity.resolve(Duration::milliseconds(260), &opts);
        assert_eq!(resolved.origin, Vector3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_angle_wrap_shortest_arc() {
        let mut entity = ClientEntity::from_state(
            EntityState {
                angles: Angles {
                    pitch: Deg(0.0),
                    roll: Deg(0.0),
                    yaw: Deg(170.0),
                },
                ..state_at(Vector3::zero(), Vector3::zero())
            },
            Duration::milliseconds(0),
        );
        entity.update(
            EntityState {
                angles: Angles {
                    pitch: Deg(0.0),
                    roll: Deg(0.0),
                    yaw: Deg(-170.0),
                },
                ..state_at(Vector3::zero(), Vector3::zero())
            },
            Duration::milliseconds(100),
        );

        let resolved = entity.resolve(Duration::milliseconds(50), &LerpOptions::default());
        // halfway through the short arc, not the long way through 0°
        let yaw = resolved.angles.yaw.0;
        assert!((yaw - 180.0).abs() < 1e-3 || (yaw + 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_prediction_error_fade() {
        let mut entity = two_snapshot_entity();
        entity.set_prediction_error(Vector3::new(10.0, 0.0, 0.0), Duration::milliseconds(150));

        let at_onset = entity.resolve(Duration::milliseconds(150), &LerpOptions::default());
        assert_eq!(at_onset.origin, Vector3::new(60.0, 0.0, 0.0));

        let halfway = entity.resolve(Duration::milliseconds(200), &LerpOptions::default());
        assert_eq!(halfway.origin, Vector3::new(105.0, 0.0, 0.0));

        let opts = LerpOptions {
            extrapolate: false,
            ..Default::default()
        };
        let done = entity.resolve(Duration::milliseconds(260), &opts);
        assert_eq!(done.origin, Vector3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn test_lifecycle_absent_destroys() {
        let mut world = EntityWorld::new();
        world.apply_snapshot(
            vec![(3, state_at(Vector3::zero(), Vector3::zero()))],
            Duration::milliseconds(0),
        );
        assert!(world.entity(3).is_some());

        world.apply_snapshot(
            vec![(4, state_at(Vector3::zero(), Vector3::zero()))],
            Duration::milliseconds(100),
        );
        assert!(world.entity(3).is_none());
        assert!(world.entity(4).is_some());
    }

    #[test]
    fn test_cubic_matches_linear_endpoints() {
        let mut entity = ClientEntity::from_state(
            state_at(Vector3::zero(), Vector3::zero()),
            Duration::milliseconds(0),
        );
        entity.update(
            state_at(Vector3::new(10.0, 0.0, 0.0), Vector3::zero()),
            Duration::milliseconds(100),
        );
        entity.update(
            state_at(Vector3::new(20.0, 0.0, 0.0), Vector3::zero()),
            Duration::milliseconds(200),
        );

        let opts = LerpOptions {
            cubic: true,
            ..Default::default()
        };
        let at_prev = entity.resolve(Duration::milliseconds(100), &opts);
        let at_curr = entity.resolve(Duration::milliseconds(200), &opts);
        assert_eq!(at_prev.origin, Vector3::new(10.0, 0.0, 0.0));
        assert_eq!(at_curr.origin, Vector3::new(20.0, 0.0, 0.0));
    }

    #[test]
    fn test_lightstyle_levels() {
        let mut styles = LightStyles::new();
        styles.set(0, "am");

        // 'a' at t=0, 'm' at t=100ms
        assert_eq!(styles.value(0, Duration::zero()), 0.0);
        let m = styles.value(0, Duration::milliseconds(100));
        assert!((m - 1.0).abs() < 1e-6);
        // unset styles are full brightness
        assert_eq!(styles.value(5, Duration::zero()), 1.0);
    }

    #[test]
    fn test_blend_fade() {
        let mut blend = [1.0, 0.0, 0.0, 0.6];
        fade_blend(&mut blend, Duration::milliseconds(250), 2.0);
        assert!((blend[3] - 0.1).abs() < 1e-6);

        fade_blend(&mut blend, Duration::seconds(1), 2.0);
        assert_eq!(blend[3], 0.0);
        assert_eq!(blend[0], 1.0);
    }

    #[test]
    fn test_particle_pool_expiry() {
        let mut particles = ParticleList::with_capacity(8);
        for expire in [5, 10] {
            particles.insert(Particle {
                kind: ParticleKind::Default,
                origin: Vector3::zero(),
                velocity: Vector3::zero(),
                color: [1.0, 1.0, 1.0],
                alpha: 1.0,
                expire: Duration::seconds(expire),
            });
        }

        particles.update(Duration::seconds(7), |_| {});
        assert_eq!(particles.len(), 1);
    }
}

//! Multi-body frame compositor.
//!
//! Each frame captures scene depth once, renders the opaque scene into one
//! color target, then chains one full-screen scattering pass per body,
//! farthest body first. Every pass samples the previous pass's output and
//! writes the other target of a [`PingPong`] pair, so no target is ever read
//! and written by the same pass.

use std::collections::HashSet;

use glam::Vec3;
use halo_render::{ActiveTarget, ReadbackError, RenderTargetId, TargetError, Viewport};

use crate::body::{AtmosphereBody, BodyId, PlanetRegistry};
use crate::coefficients::{ScatterCoefficientModel, ScatterCoefficients};
use crate::depth::{self, CameraState, DepthToken};

/// Errors that drop the current frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("render target allocation failed: {0}")]
    Target(#[from] TargetError),

    #[error("device lost")]
    DeviceLost,

    #[error("render targets are not allocated")]
    TargetsMissing,

    #[error("no material prepared for {0}")]
    MaterialMissing(BodyId),

    #[error("scene render failed: {0}")]
    Scene(String),

    #[error(transparent)]
    Readback(#[from] ReadbackError),
}

/// One of the two color targets of the scattering chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainTarget {
    Ping,
    Pong,
}

impl ChainTarget {
    pub fn index(self) -> usize {
        match self {
            Self::Ping => 0,
            Self::Pong => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Ping => Self::Pong,
            Self::Pong => Self::Ping,
        }
    }
}

/// A pass's input and output target. `source != destination` always.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainLink {
    pub source: ChainTarget,
    pub destination: ChainTarget,
}

/// Tracks which target holds the latest chain output.
#[derive(Debug)]
pub struct PingPong {
    current: ChainTarget,
}

impl PingPong {
    /// Chain whose first source is [`ChainTarget::Ping`].
    pub fn new() -> Self {
        Self {
            current: ChainTarget::Ping,
        }
    }

    /// Target holding the latest output.
    pub fn current(&self) -> ChainTarget {
        self.current
    }

    /// Hand the current output to the next pass and return that pass's link.
    /// Its destination becomes the new current target.
    pub fn advance(&mut self) -> ChainLink {
        let link = ChainLink {
            source: self.current,
            destination: self.current.other(),
        };
        self.current = link.destination;
        link
    }
}

impl Default for PingPong {
    fn default() -> Self {
        Self::new()
    }
}

/// Readiness of a body's pass resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialState {
    Ready,
    /// Resources are not compiled yet; the body sits out this frame.
    Pending,
}

/// Everything one scattering pass needs besides the textures.
#[derive(Clone, Copy, Debug)]
pub struct BodyPass<'a> {
    pub id: BodyId,
    pub body: &'a AtmosphereBody,
    pub camera: &'a CameraState,
    pub coefficients: ScatterCoefficients,
}

/// Where a frame's passes execute.
pub trait FrameBackend {
    /// Opaque scene the backend knows how to draw.
    type Scene: ?Sized;

    /// Create or resize the depth, chain, and presentation targets.
    fn ensure_targets(&mut self, viewport: Viewport) -> Result<(), FrameError>;

    /// Render scene depth into the depth target. Called only through
    /// [`depth::capture`].
    fn render_depth(&mut self, scene: &Self::Scene, camera: &CameraState)
    -> Result<(), FrameError>;

    /// Render the opaque scene into `target`.
    fn render_scene(
        &mut self,
        scene: &Self::Scene,
        camera: &CameraState,
        target: ChainTarget,
    ) -> Result<(), FrameError>;

    /// Create, or check on, the resources for `id`'s pass.
    fn prepare_material(&mut self, id: BodyId) -> MaterialState;

    /// Free every resource owned by `id`'s pass.
    fn release_material(&mut self, id: BodyId);

    /// Full-screen scattering pass for one body.
    fn scatter_pass(
        &mut self,
        depth: &DepthToken,
        link: ChainLink,
        pass: &BodyPass<'_>,
    ) -> Result<(), FrameError>;

    /// Copy `source` into the presentation target.
    fn present(&mut self, source: ChainTarget) -> Result<(), FrameError>;

    /// Free all render targets. They are recreated by the next `ensure_targets`.
    fn release_targets(&mut self);
}

/// Per-frame inputs from the camera and configuration collaborators.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs {
    pub camera: CameraState,
    pub viewport: Viewport,
    pub wavelengths: [f32; 3],
    pub strength: f32,
}

/// What a presented frame composited.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    /// Bodies in the order their passes ran.
    pub order: Vec<BodyId>,
    /// Bodies whose materials were not ready.
    pub skipped_unready: Vec<BodyId>,
    pub coefficients: ScatterCoefficients,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Presented(FrameReport),
    /// The frame was dropped; present a clear color instead.
    Skipped(FrameError),
}

impl FrameOutcome {
    pub fn report(&self) -> Option<&FrameReport> {
        match self {
            Self::Presented(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }
}

/// Sort bodies farthest-first by distance from `camera_position` to their
/// centers. Equal distances keep their relative order.
pub fn sort_back_to_front(bodies: &mut [(BodyId, AtmosphereBody)], camera_position: Vec3) {
    bodies.sort_by(|(_, a), (_, b)| {
        let da = a.center.distance_squared(camera_position);
        let db = b.center.distance_squared(camera_position);
        db.total_cmp(&da)
    });
}

/// Drives one frame at a time through a [`FrameBackend`].
pub struct FrameCompositor<B: FrameBackend> {
    backend: B,
    coefficients: ScatterCoefficientModel,
    materials: HashSet<BodyId>,
    active: ActiveTarget,
    frame: u64,
}

impl<B: FrameBackend> FrameCompositor<B> {
    pub fn new(backend: B, coefficients: ScatterCoefficientModel) -> Self {
        Self {
            backend,
            coefficients,
            materials: HashSet::new(),
            active: ActiveTarget::new(),
            frame: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Coefficients used by the most recent frame.
    pub fn coefficients(&self) -> ScatterCoefficients {
        self.coefficients.current()
    }

    /// Number of frames attempted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Render one frame. Errors are absorbed into [`FrameOutcome::Skipped`];
    /// the targets are dropped and rebuilt on the next call.
    pub fn render_frame(
        &mut self,
        registry: &PlanetRegistry,
        scene: &B::Scene,
        inputs: &FrameInputs,
    ) -> FrameOutcome {
        self.frame += 1;
        self.coefficients.update(inputs.wavelengths, inputs.strength);

        let snapshot = registry.snapshot();
        let (ready, skipped_unready) = self.sync_materials(snapshot);
        if !skipped_unready.is_empty() {
            tracing::debug!(
                "Frame {}: {} bodies not ready",
                self.frame,
                skipped_unready.len()
            );
        }

        match self.composite(scene, inputs, ready) {
            Ok(order) => FrameOutcome::Presented(FrameReport {
                order,
                skipped_unready,
                coefficients: self.coefficients.current(),
            }),
            Err(err) => {
                tracing::warn!("Frame {} skipped: {err}", self.frame);
                self.backend.release_targets();
                FrameOutcome::Skipped(err)
            }
        }
    }

    /// Release one body's pass resources now instead of on the next frame.
    pub fn release_body(&mut self, id: BodyId) {
        if self.materials.remove(&id) {
            self.backend.release_material(id);
            tracing::debug!("Released material for {id}");
        }
    }

    /// Release every material and render target.
    pub fn teardown(&mut self) {
        for id in self.materials.drain() {
            self.backend.release_material(id);
        }
        self.backend.release_targets();
    }

    fn sync_materials(
        &mut self,
        snapshot: Vec<(BodyId, AtmosphereBody)>,
    ) -> (Vec<(BodyId, AtmosphereBody)>, Vec<BodyId>) {
        let live: HashSet<BodyId> = snapshot.iter().map(|(id, _)| *id).collect();
        let stale: Vec<BodyId> = self.materials.difference(&live).copied().collect();
        for id in stale {
            self.release_body(id);
        }

        let mut ready = Vec::with_capacity(snapshot.len());
        let mut pending = Vec::new();
        for (id, body) in snapshot {
            self.materials.insert(id);
            match self.backend.prepare_material(id) {
                MaterialState::Ready => ready.push((id, body)),
                MaterialState::Pending => pending.push(id),
            }
        }
        (ready, pending)
    }

    fn composite(
        &mut self,
        scene: &B::Scene,
        inputs: &FrameInputs,
        mut bodies: Vec<(BodyId, AtmosphereBody)>,
    ) -> Result<Vec<BodyId>, FrameError> {
        let camera = &inputs.camera;
        self.backend.ensure_targets(inputs.viewport)?;
        let depth = depth::capture(
            &mut self.backend,
            scene,
            camera,
            &mut self.active,
            self.frame,
        )?;

        let mut chain = PingPong::new();
        {
            let _binding = self.active.bind(RenderTargetId::Color(chain.current().index()));
            self.backend.render_scene(scene, camera, chain.current())?;
        }

        sort_back_to_front(&mut bodies, camera.position);
        let coefficients = self.coefficients.current();
        let mut order = Vec::with_capacity(bodies.len());
        for (id, body) in &bodies {
            let link = chain.advance();
            let _binding = self
                .active
                .bind(RenderTargetId::Color(link.destination.index()));
            self.backend.scatter_pass(
                &depth,
                link,
                &BodyPass {
                    id: *id,
                    body,
                    camera,
                    coefficients,
                },
            )?;
            order.push(*id);
        }

        let _binding = self.active.bind(RenderTargetId::Presentation);
        self.backend.present(chain.current())?;
        Ok(order)
    }
}

impl<B: FrameBackend> Drop for FrameCompositor<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_render::Camera;

    /// Records the calls it receives.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Vec<String>,
        pending: HashSet<BodyId>,
        fail_depth: bool,
        fail_scene: bool,
        targets: bool,
    }

    impl FrameBackend for RecordingBackend {
        type Scene = ();

        fn ensure_targets(&mut self, _viewport: Viewport) -> Result<(), FrameError> {
            if !self.targets {
                self.calls.push("create-targets".into());
                self.targets = true;
            }
            Ok(())
        }

        fn render_depth(&mut self, _: &(), _: &CameraState) -> Result<(), FrameError> {
            if self.fail_depth {
                return Err(FrameError::Scene("no depth".into()));
            }
            self.calls.push("depth".into());
            Ok(())
        }

        fn render_scene(
            &mut self,
            _: &(),
            _: &CameraState,
            target: ChainTarget,
        ) -> Result<(), FrameError> {
            if self.fail_scene {
                return Err(FrameError::Scene("boom".into()));
            }
            self.calls.push(format!("scene->{target:?}"));
            Ok(())
        }

        fn prepare_material(&mut self, id: BodyId) -> MaterialState {
            if self.pending.contains(&id) {
                MaterialState::Pending
            } else {
                MaterialState::Ready
            }
        }

        fn release_material(&mut self, id: BodyId) {
            self.calls.push(format!("release {id}"));
        }

        fn scatter_pass(
            &mut self,
            _depth: &DepthToken,
            link: ChainLink,
            pass: &BodyPass<'_>,
        ) -> Result<(), FrameError> {
            self.calls.push(format!(
                "scatter {} {:?}->{:?}",
                pass.body.name, link.source, link.destination
            ));
            Ok(())
        }

        fn present(&mut self, source: ChainTarget) -> Result<(), FrameError> {
            self.calls.push(format!("present {source:?}"));
            Ok(())
        }

        fn release_targets(&mut self) {
            if self.targets {
                self.calls.push("release-targets".into());
                self.targets = false;
            }
        }
    }

    fn inputs() -> FrameInputs {
        let camera = Camera::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 0.1, 100.0);
        FrameInputs {
            camera: CameraState::from_camera(&camera),
            viewport: Viewport::new(4, 4),
            wavelengths: [700.0, 530.0, 440.0],
            strength: 1.0,
        }
    }

    fn body(name: &str, z: f32) -> AtmosphereBody {
        AtmosphereBody::new(name, Vec3::new(0.0, 0.0, z), 1.0, 1.5, 4.0)
    }

    fn compositor() -> FrameCompositor<RecordingBackend> {
        FrameCompositor::new(
            RecordingBackend::default(),
            ScatterCoefficientModel::new([700.0, 530.0, 440.0], 1.0),
        )
    }

    #[test]
    fn test_ping_pong_alternates() {
        let mut chain = PingPong::new();
        let first = chain.advance();
        let second = chain.advance();
        assert_eq!(first.source, ChainTarget::Ping);
        assert_eq!(first.destination, ChainTarget::Pong);
        assert_eq!(second.source, first.destination);
        assert_ne!(second.source, second.destination);
        assert_eq!(chain.current(), ChainTarget::Ping);
    }

    #[test]
    fn test_sort_farthest_first() {
        let camera = Vec3::ZERO;
        let mut bodies = vec![
            (BodyId::from_raw(0), body("near", -10.0)),
            (BodyId::from_raw(1), body("far", -20.0)),
        ];
        sort_back_to_front(&mut bodies, camera);
        assert_eq!(bodies[0].1.name, "far");
        assert_eq!(bodies[1].1.name, "near");
    }

    #[test]
    fn test_frame_sequence() {
        let mut registry = PlanetRegistry::new();
        registry.register(body("near", -10.0)).unwrap();
        registry.register(body("far", -20.0)).unwrap();

        let mut compositor = compositor();
        let outcome = compositor.render_frame(&registry, &(), &inputs());
        let report = outcome.report().unwrap();
        assert_eq!(
            report.order,
            vec![
                registry.id_of("far").unwrap(),
                registry.id_of("near").unwrap()
            ]
        );
        assert_eq!(
            compositor.backend().calls,
            vec![
                "create-targets",
                "depth",
                "scene->Ping",
                "scatter far Ping->Pong",
                "scatter near Pong->Ping",
                "present Ping",
            ]
        );
        assert!(compositor.active.current().is_none());
    }

    #[test]
    fn test_zero_bodies_present_scene() {
        let registry = PlanetRegistry::new();
        let mut compositor = compositor();
        let report = compositor
            .render_frame(&registry, &(), &inputs())
            .report()
            .cloned()
            .unwrap();
        assert!(report.order.is_empty());
        assert_eq!(
            compositor.backend().calls,
            vec!["create-targets", "depth", "scene->Ping", "present Ping"]
        );
    }

    #[test]
    fn test_pending_material_is_skipped() {
        let mut registry = PlanetRegistry::new();
        let id = registry.register(body("late", -10.0)).unwrap();
        let mut compositor = compositor();
        compositor.backend_mut().pending.insert(id);

        let report = compositor
            .render_frame(&registry, &(), &inputs())
            .report()
            .cloned()
            .unwrap();
        assert!(report.order.is_empty());
        assert_eq!(report.skipped_unready, vec![id]);

        compositor.backend_mut().pending.clear();
        let report = compositor
            .render_frame(&registry, &(), &inputs())
            .report()
            .cloned()
            .unwrap();
        assert_eq!(report.order, vec![id]);
    }

    #[test]
    fn test_deregistered_body_is_released() {
        let mut registry = PlanetRegistry::new();
        let id = registry.register(body("gone", -10.0)).unwrap();
        let mut compositor = compositor();
        compositor.render_frame(&registry, &(), &inputs());

        registry.deregister(id);
        compositor.backend_mut().calls.clear();
        compositor.render_frame(&registry, &(), &inputs());
        assert_eq!(compositor.backend().calls[0], format!("release {id}"));
    }

    #[test]
    fn test_scene_failure_skips_frame_and_recreates_targets() {
        let registry = PlanetRegistry::new();
        let mut compositor = compositor();
        compositor.backend_mut().fail_scene = true;

        let outcome = compositor.render_frame(&registry, &(), &inputs());
        assert!(matches!(outcome, FrameOutcome::Skipped(FrameError::Scene(_))));
        assert!(!compositor.backend().targets);
        assert!(compositor.active.current().is_none());

        compositor.backend_mut().fail_scene = false;
        compositor.backend_mut().calls.clear();
        assert!(compositor.render_frame(&registry, &(), &inputs()).report().is_some());
        assert_eq!(compositor.backend().calls[0], "create-targets");
    }

    #[test]
    fn test_depth_failure_unbinds_and_skips_frame() {
        let mut registry = PlanetRegistry::new();
        registry.register(body("a", -10.0)).unwrap();
        let mut compositor = compositor();
        compositor.backend_mut().fail_depth = true;

        let outcome = compositor.render_frame(&registry, &(), &inputs());
        assert!(matches!(outcome, FrameOutcome::Skipped(FrameError::Scene(_))));
        assert!(compositor.active.current().is_none());
        assert!(!compositor.backend().targets);
        assert_eq!(
            compositor.backend().calls,
            vec!["create-targets", "release-targets"]
        );
        assert_eq!(compositor.frame_index(), 1);

        compositor.backend_mut().fail_depth = false;
        assert!(compositor.render_frame(&registry, &(), &inputs()).report().is_some());
        assert!(compositor.active.current().is_none());
        assert_eq!(compositor.frame_index(), 2);
    }

    #[test]
    fn test_coefficients_follow_inputs() {
        let registry = PlanetRegistry::new();
        let mut compositor = compositor();
        let mut frame = inputs();
        frame.strength = 2.0;
        let report = compositor
            .render_frame(&registry, &(), &frame)
            .report()
            .cloned()
            .unwrap();
        let expected = ScatterCoefficients::from_wavelengths(frame.wavelengths, 2.0);
        assert_eq!(report.coefficients, expected);
        assert_eq!(compositor.coefficients(), expected);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut registry = PlanetRegistry::new();
        let id = registry.register(body("a", -10.0)).unwrap();
        let mut compositor = compositor();
        compositor.render_frame(&registry, &(), &inputs());
        compositor.backend_mut().calls.clear();

        compositor.teardown();
        assert_eq!(
            compositor.backend().calls,
            vec![format!("release {id}"), "release-targets".to_string()]
        );
    }
}

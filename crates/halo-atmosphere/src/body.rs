//! Atmosphere bodies and the registry that owns them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use glam::Vec3;
use halo_config::PlanetConfig;

/// Stable handle to a registered body. Ids are never reused within a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u32);

impl BodyId {
    pub fn raw(self) -> u32 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body#{}", self.0)
    }
}

/// A planet and the atmosphere shell around it.
#[derive(Clone, Debug, PartialEq)]
pub struct AtmosphereBody {
    pub name: String,
    /// World-space center of the solid body.
    pub center: Vec3,
    pub planet_radius: f32,
    pub atmosphere_radius: f32,
    /// Normalized direction toward the dominant light, rewritten every frame
    /// by [`PlanetRegistry::track_light`].
    pub light_direction: Vec3,
    /// Exponential density decay rate with altitude.
    pub density_falloff: f32,
}

impl AtmosphereBody {
    pub fn new(
        name: impl Into<String>,
        center: Vec3,
        planet_radius: f32,
        atmosphere_radius: f32,
        density_falloff: f32,
    ) -> Self {
        Self {
            name: name.into(),
            center,
            planet_radius,
            atmosphere_radius,
            light_direction: Vec3::Y,
            density_falloff,
        }
    }

    /// Thickness of the atmosphere shell.
    pub fn shell_thickness(&self) -> f32 {
        self.atmosphere_radius - self.planet_radius
    }

    /// Check `atmosphere_radius > planet_radius > 0` and `density_falloff > 0`.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !(self.planet_radius > 0.0 && self.atmosphere_radius > self.planet_radius) {
            return Err(RegistryError::InvalidRadii {
                name: self.name.clone(),
                planet_radius: self.planet_radius,
                atmosphere_radius: self.atmosphere_radius,
            });
        }
        if !(self.density_falloff > 0.0) {
            return Err(RegistryError::InvalidFalloff {
                name: self.name.clone(),
                density_falloff: self.density_falloff,
            });
        }
        Ok(())
    }
}

impl From<&PlanetConfig> for AtmosphereBody {
    fn from(config: &PlanetConfig) -> Self {
        Self::new(
            config.name.clone(),
            Vec3::from(config.center),
            config.planet_radius,
            config.atmosphere_radius,
            config.density_falloff,
        )
    }
}

/// Errors raised by registry mutations.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("a body named '{0}' is already registered")]
    DuplicateName(String),

    #[error(
        "body '{name}' needs atmosphere_radius > planet_radius > 0, got {planet_radius} / {atmosphere_radius}"
    )]
    InvalidRadii {
        name: String,
        planet_radius: f32,
        atmosphere_radius: f32,
    },

    #[error("body '{name}' needs a positive density falloff, got {density_falloff}")]
    InvalidFalloff { name: String, density_falloff: f32 },

    #[error("{0} is not registered")]
    UnknownBody(BodyId),
}

/// Set of atmosphere bodies, iterated in registration order.
#[derive(Debug, Default)]
pub struct PlanetRegistry {
    bodies: BTreeMap<BodyId, AtmosphereBody>,
    name_index: HashMap<String, BodyId>,
    next_id: u32,
}

impl PlanetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured planets. Invalid entries are logged
    /// and skipped.
    pub fn from_configs(planets: &[PlanetConfig]) -> Self {
        let mut registry = Self::new();
        for planet in planets {
            if let Err(err) = registry.register(AtmosphereBody::from(planet)) {
                tracing::warn!("Skipping configured planet: {err}");
            }
        }
        registry
    }

    /// Register a body, returning its id.
    ///
    /// # Errors
    ///
    /// Rejects bodies violating the radius or falloff invariants and names
    /// that are already taken.
    pub fn register(&mut self, body: AtmosphereBody) -> Result<BodyId, RegistryError> {
        body.validate()?;
        if self.name_index.contains_key(&body.name) {
            return Err(RegistryError::DuplicateName(body.name));
        }

        let id = BodyId(self.next_id);
        self.next_id += 1;
        tracing::debug!("Registered {} as {id}", body.name);
        self.name_index.insert(body.name.clone(), id);
        self.bodies.insert(id, body);
        Ok(id)
    }

    /// Remove a body. The compositor releases its GPU resources on the next
    /// frame that no longer sees it.
    pub fn deregister(&mut self, id: BodyId) -> Option<AtmosphereBody> {
        let body = self.bodies.remove(&id)?;
        self.name_index.remove(&body.name);
        tracing::debug!("Deregistered {} ({id})", body.name);
        Some(body)
    }

    /// Edit a body in place. The edit is rolled back if it breaks an
    /// invariant or renames the body onto an existing name.
    pub fn update(
        &mut self,
        id: BodyId,
        edit: impl FnOnce(&mut AtmosphereBody),
    ) -> Result<(), RegistryError> {
        let body = self
            .bodies
            .get_mut(&id)
            .ok_or(RegistryError::UnknownBody(id))?;
        let mut edited = body.clone();
        edit(&mut edited);
        edited.validate()?;

        if edited.name != body.name {
            if self.name_index.contains_key(&edited.name) {
                return Err(RegistryError::DuplicateName(edited.name));
            }
            self.name_index.remove(&body.name);
            self.name_index.insert(edited.name.clone(), id);
        }
        *body = edited;
        Ok(())
    }

    /// Move a body.
    pub fn set_center(&mut self, id: BodyId, center: Vec3) -> Result<(), RegistryError> {
        self.update(id, |body| body.center = center)
    }

    /// Re-derive every body's light direction from one light position.
    /// A body centered exactly on the light keeps its previous direction.
    pub fn track_light(&mut self, light_position: Vec3) {
        for body in self.bodies.values_mut() {
            if let Some(dir) = (light_position - body.center).try_normalize() {
                body.light_direction = dir;
            }
        }
    }

    pub fn get(&self, id: BodyId) -> Option<&AtmosphereBody> {
        self.bodies.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&AtmosphereBody> {
        self.id_of(name).and_then(|id| self.bodies.get(&id))
    }

    pub fn id_of(&self, name: &str) -> Option<BodyId> {
        self.name_index.get(name).copied()
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.bodies.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyId, &AtmosphereBody)> {
        self.bodies.iter().map(|(&id, body)| (id, body))
    }

    /// Owned copy of the current bodies, stable for one frame's composite.
    pub fn snapshot(&self) -> Vec<(BodyId, AtmosphereBody)> {
        self.bodies
            .iter()
            .map(|(&id, body)| (id, body.clone()))
            .collect()
    }
}

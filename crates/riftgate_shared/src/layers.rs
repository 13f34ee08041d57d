use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const LAYER_PORTAL_NONE: &str = "portal_none";
pub const LAYER_PORTAL_SIDE_A: &str = "portal_side_a";
pub const LAYER_PORTAL_SIDE_A_EXCLUSIVE: &str = "portal_side_a_exclusive";
pub const LAYER_PORTAL_SIDE_B: &str = "portal_side_b";
pub const LAYER_PORTAL_SIDE_B_EXCLUSIVE: &str = "portal_side_b_exclusive";

/// Identifier of a named collision layer. `UNDEFINED` is the fallback for
/// names a scene never configured; objects left on it simply miss the
/// intended collision exclusivity instead of crashing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u8);

impl LayerId {
    pub const UNDEFINED: LayerId = LayerId(u8::MAX);

    pub fn is_undefined(&self) -> bool {
        *self == Self::UNDEFINED
    }
}

bitflags! {
    /// Which groups of scene geometry a layer collides with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LayerMask: u8 {
        const SIDE_A_WORLD = 1 << 0;
        const SIDE_B_WORLD = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub struct LayerProperties {
    pub name: String,
    pub collides_with: LayerMask,
}

/// Name -> id mapping for collision layers, built once at scene setup and
/// then read-only.
#[derive(Default, Debug, Clone)]
pub struct LayerRegistry {
    properties: Vec<LayerProperties>,
    by_name: HashMap<String, LayerId>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, collides_with: LayerMask) -> LayerId {
        if let Some(existing) = self.by_name.get(name) {
            return *existing;
        }

        let next_index = self.properties.len();
        assert!(next_index < LayerId::UNDEFINED.0 as usize, "layer registry full");
        let id = LayerId(next_index as u8);

        self.by_name.insert(name.to_string(), id);
        self.properties.push(LayerProperties {
            name: name.to_string(),
            collides_with,
        });
        id
    }

    /// Resolves a layer name, falling back to [`LayerId::UNDEFINED`] with a
    /// warning when the scene never configured it.
    pub fn resolve(&self, name: &str) -> LayerId {
        match self.by_name.get(name) {
            Some(id) => *id,
            None => {
                warn!("collision layer {name:?} is not configured, falling back to undefined");
                LayerId::UNDEFINED
            }
        }
    }

    pub fn collision_mask(&self, id: LayerId) -> LayerMask {
        self.properties
            .get(id.0 as usize)
            .map(|props| props.collides_with)
            .unwrap_or(LayerMask::empty())
    }

    pub fn name(&self, id: LayerId) -> Option<&str> {
        self.properties.get(id.0 as usize).map(|props| props.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// The five portal layers, resolved once at startup and passed by value to
/// everything that swaps layers. Exclusive layers collide with exactly one
/// side's environment so a traveler spanning the boundary and its clone
/// never both hit the same wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSet {
    pub none: LayerId,
    pub side_a: LayerId,
    pub side_a_exclusive: LayerId,
    pub side_b: LayerId,
    pub side_b_exclusive: LayerId,
}

impl LayerSet {
    pub fn resolve(registry: &LayerRegistry) -> Self {
        Self {
            none: registry.resolve(LAYER_PORTAL_NONE),
            side_a: registry.resolve(LAYER_PORTAL_SIDE_A),
            side_a_exclusive: registry.resolve(LAYER_PORTAL_SIDE_A_EXCLUSIVE),
            side_b: registry.resolve(LAYER_PORTAL_SIDE_B),
            side_b_exclusive: registry.resolve(LAYER_PORTAL_SIDE_B_EXCLUSIVE),
        }
    }
}

pub fn register_portal_layers(registry: &mut LayerRegistry) {
    registry.register(LAYER_PORTAL_NONE, LayerMask::SIDE_A_WORLD | LayerMask::SIDE_B_WORLD);
    registry.register(LAYER_PORTAL_SIDE_A, LayerMask::SIDE_A_WORLD | LayerMask::SIDE_B_WORLD);
    registry.register(LAYER_PORTAL_SIDE_A_EXCLUSIVE, LayerMask::SIDE_A_WORLD);
    registry.register(LAYER_PORTAL_SIDE_B, LayerMask::SIDE_A_WORLD | LayerMask::SIDE_B_WORLD);
    registry.register(LAYER_PORTAL_SIDE_B_EXCLUSIVE, LayerMask::SIDE_B_WORLD);
}

#[cfg(test)]
mod tests {
    use super::{
        register_portal_layers, LayerId, LayerMask, LayerRegistry, LayerSet,
        LAYER_PORTAL_SIDE_A_EXCLUSIVE,
    };

    #[test]
    fn unknown_layer_name_falls_back_to_undefined() {
        let registry = LayerRegistry::new();
        let id = registry.resolve("portal_side_c");
        assert!(id.is_undefined());
        assert_eq!(registry.collision_mask(id), LayerMask::empty());
    }

    #[test]
    fn registering_twice_returns_the_same_id() {
        let mut registry = LayerRegistry::new();
        let first = registry.register("portal_none", LayerMask::all());
        let second = registry.register("portal_none", LayerMask::empty());
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn layer_set_resolves_distinct_layers() {
        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        let layers = LayerSet::resolve(&registry);

        let all = [
            layers.none,
            layers.side_a,
            layers.side_a_exclusive,
            layers.side_b,
            layers.side_b_exclusive,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(!a.is_undefined());
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn exclusive_layers_collide_with_one_side_only() {
        let mut registry = LayerRegistry::new();
        register_portal_layers(&mut registry);
        let id = registry.resolve(LAYER_PORTAL_SIDE_A_EXCLUSIVE);
        assert_eq!(registry.collision_mask(id), LayerMask::SIDE_A_WORLD);
    }

    #[test]
    fn undefined_sentinel_is_reserved() {
        assert_eq!(LayerId::UNDEFINED, LayerId(u8::MAX));
    }
}

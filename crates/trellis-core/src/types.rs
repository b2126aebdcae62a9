//! Identity types for solver variables.

use std::fmt;

/// Opaque handle of an entity whose properties are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityHandle(pub u64);

/// Identifier of a touch, as reported by the input system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchId(pub u64);

/// A layout attribute of an entity or touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Property {
    PositionX = 0,
    PositionY = 1,
    Width = 2,
    Height = 3,
    AnchorX = 4,
    AnchorY = 5,
    Rotation = 6,
    Scale = 7,
    Opacity = 8,
}

impl Property {
    /// All properties, in ordinal order.
    pub const ALL: [Property; 9] = [
        Property::PositionX,
        Property::PositionY,
        Property::Width,
        Property::Height,
        Property::AnchorX,
        Property::AnchorY,
        Property::Rotation,
        Property::Scale,
        Property::Opacity,
    ];

    /// Decode a property from its wire ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }

    /// The wire ordinal of this property.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Property::PositionX => "position.x",
            Property::PositionY => "position.y",
            Property::Width => "width",
            Property::Height => "height",
            Property::AnchorX => "anchor.x",
            Property::AnchorY => "anchor.y",
            Property::Rotation => "rotation",
            Property::Scale => "scale",
            Property::Opacity => "opacity",
        }
    }
}

/// What a variable belongs to.
///
/// `Entity` and `Touch` are concrete. `Proxy(n)` stands for the touch at
/// zero-based position `n` among the active touches, in the order they
/// began; it must be replaced by a concrete target before the constraint
/// reaches the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    Entity(EntityHandle),
    Touch(TouchId),
    Proxy(u32),
}

impl Target {
    pub fn is_proxy(&self) -> bool {
        matches!(self, Target::Proxy(_))
    }

    /// The proxy index, if this is a proxy target.
    pub fn proxy_index(&self) -> Option<u32> {
        match self {
            Target::Proxy(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Entity(handle) => write!(f, "entity:{}", handle.0),
            Target::Touch(id) => write!(f, "touch:{}", id.0),
            Target::Proxy(index) => write!(f, "proxy:{}", index),
        }
    }
}

/// A scalar unknown, identified by the property of a target.
///
/// Two variables with the same target and property are the same variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    pub target: Target,
    pub property: Property,
}

impl Variable {
    pub fn new(target: Target, property: Property) -> Self {
        Self { target, property }
    }

    /// A variable on a concrete entity.
    pub fn entity(handle: u64, property: Property) -> Self {
        Self::new(Target::Entity(EntityHandle(handle)), property)
    }

    /// A variable on a concrete touch.
    pub fn touch(id: TouchId, property: Property) -> Self {
        Self::new(Target::Touch(id), property)
    }

    /// A variable on the `index`th active touch.
    pub fn proxy(index: u32, property: Property) -> Self {
        Self::new(Target::Proxy(index), property)
    }

    pub fn is_proxy(&self) -> bool {
        self.target.is_proxy()
    }

    /// The same property on a different target.
    pub fn with_target(&self, target: Target) -> Self {
        Self::new(target, self.property)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.property.name())
    }
}

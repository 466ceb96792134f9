//! impulse3d – a multithreaded rigid-body physics simulation core.
//!
//! The crate advances a world of rigid bodies under gravity, external forces,
//! and mutual contact while honoring articulated constraints. It is built
//! around four subsystems: a loose quadtree broadphase, a narrowphase with a
//! persistent contact cache, an island-based sequential-impulse solver with
//! continuous collision detection, and an explicit job-graph update pipeline.

pub mod broadphase;
pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod listeners;
pub mod pipeline;
pub mod shapes;
pub mod state;
pub mod system;
pub mod utils;

pub use glam::{Mat3, Quat, Vec3};

pub use broadphase::{BodyPair, BroadPhaseHit};
pub use collision::queries::{
    AllHitsCollector, AnyHitCollector, CollideShapeHit, CollisionCollector, NarrowPhaseQuery,
    RayCastHit, ShapeCastHit, TransformedShape,
};
pub use collision::Manifold;
pub use config::PhysicsSettings;
pub use core::{
    Body, BodyCreationSettings, BodyId, BroadPhaseLayer, BroadPhaseLayerInterface, MassProperties,
    MotionQuality, MotionType, ObjectLayer, ObjectLayerPairFilter, ObjectVsBroadPhaseLayerFilter,
    SingleBroadPhaseLayer,
};
pub use dynamics::{AxisState, Constraint, MotorSettings};
pub use listeners::{
    BodyActivationListener, ContactListener, ContactSettings, StepListener, ValidateResult,
};
pub use shapes::{CompoundChild, Shape, SubShapeId};
pub use state::StateRecorder;
pub use system::{BodyInterface, ConstraintHandle, PhysicsSystem, PhysicsSystemSettings};

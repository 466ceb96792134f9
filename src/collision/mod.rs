//! Collision detection: GJK/EPA, narrowphase dispatch, polygon clipping, the
//! persistent contact cache, continuous collision detection, and the
//! narrowphase query interface.

pub mod cache;
pub mod ccd;
pub mod clipping;
pub mod gjk;
pub mod narrowphase;
pub mod queries;

pub use cache::{ContactCache, ContactCacheSet, ManifoldKey, WarmManifold};
pub use narrowphase::{CollideShapeResult, Manifold, ShapeCastResult};
pub use queries::NarrowPhaseQuery;

//! Simulation dynamics: integration, islands, the sequential-impulse solver,
//! contact constraints, and joints.

pub mod contact_constraints;
pub mod integrator;
pub mod island;
pub mod joints;
pub mod solver;
pub mod solver_parts;

pub use contact_constraints::ContactConstraint;
pub use island::{Island, IslandBuilder};
pub use joints::{AxisState, Constraint, MotorSettings};
pub use solver::{IslandJoint, JointCell, PreparedIsland};
pub use solver_parts::{AxisConstraintPart, PointConstraintPart, RotationConstraintPart, SolverBody};

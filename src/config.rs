//! Global tuning constants and the runtime settings block for the simulation.

use serde::{Deserialize, Serialize};

/// Default gravity vector applied in the physics system (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Default integration timestep (in seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Upper bound on contact points kept per manifold.
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// Smallest bucket count the contact cache will size itself to.
pub const MIN_CACHE_BUCKETS: usize = 1024;

/// Runtime tuning block. All distances are meters; angular tolerances are
/// stored as cosines of the angle unless stated otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Number of solver velocity iterations per sub-step.
    pub num_velocity_steps: u32,
    /// Number of solver position iterations per sub-step.
    pub num_position_steps: u32,
    /// Fraction of position error corrected per position iteration.
    pub baumgarte: f32,
    /// Penetration we leave in place so contacts stay alive between frames.
    pub penetration_slop: f32,
    /// Hard cap on the penetration distance the position solver corrects.
    pub max_penetration_distance: f32,
    /// Radius around shapes within which contacts are created speculatively.
    pub speculative_contact_distance: f32,
    /// Squared tolerance used when building a manifold between two faces.
    pub manifold_tolerance_sq: f32,
    /// Squared position delta under which a body pair reuses last frame's manifolds.
    pub body_pair_cache_max_delta_position_sq: f32,
    /// cos(angle / 2) of the max orientation delta for body pair cache reuse.
    pub body_pair_cache_cos_max_delta_rotation: f32,
    /// cos(angle) within which two manifold normals are merged during reduction.
    pub contact_normal_cos_max_delta_rotation: f32,
    /// Squared distance within which a new contact point inherits a cached lambda.
    pub contact_point_preserve_lambda_max_dist_sq: f32,
    /// Approach speeds below this produce no restitution bounce.
    pub min_velocity_for_restitution: f32,
    /// Fraction of the inner radius a body may travel per sub-step before
    /// linear cast kicks in.
    pub linear_cast_threshold: f32,
    /// Fraction of the inner radius a linear cast is allowed to penetrate.
    pub linear_cast_max_penetration: f32,
    /// Max point velocity (m/s) a body may have and still fall asleep.
    pub point_velocity_sleep_threshold: f32,
    /// Seconds a body must stay below the sleep threshold before it sleeps.
    pub time_before_sleep: f32,
    /// Whether warm starting applies cached impulses at the start of a sub-step.
    pub constraint_warm_start: bool,
    /// Whether islands may fall asleep at all.
    pub allow_sleeping: bool,
    /// Whether colliding manifolds from one body pair are merged and pruned.
    pub use_manifold_reduction: bool,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            num_velocity_steps: 10,
            num_position_steps: 2,
            baumgarte: 0.2,
            penetration_slop: 0.02,
            max_penetration_distance: 0.2,
            speculative_contact_distance: 0.02,
            manifold_tolerance_sq: 1.0e-3 * 1.0e-3,
            body_pair_cache_max_delta_position_sq: 0.001 * 0.001,
            // cos(2 degrees / 2)
            body_pair_cache_cos_max_delta_rotation: 0.999_847_7,
            // cos(5 degrees)
            contact_normal_cos_max_delta_rotation: 0.996_194_7,
            contact_point_preserve_lambda_max_dist_sq: 0.01 * 0.01,
            min_velocity_for_restitution: 1.0,
            linear_cast_threshold: 0.75,
            linear_cast_max_penetration: 0.25,
            point_velocity_sleep_threshold: 0.03,
            time_before_sleep: 0.5,
            constraint_warm_start: true,
            allow_sleeping: true,
            use_manifold_reduction: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let settings = PhysicsSettings::default();
        assert!(settings.penetration_slop < settings.max_penetration_distance);
        assert!(settings.linear_cast_max_penetration < settings.linear_cast_threshold);
        assert!(
            settings.body_pair_cache_cos_max_delta_rotation
                > settings.contact_normal_cos_max_delta_rotation
        );
    }
}

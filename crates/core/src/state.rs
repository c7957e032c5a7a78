//! Physics state handed to step hooks.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// A three-component vector in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, rhs: Vector3) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

/// Orientation as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Flight milestone detected during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    #[default]
    None,
    Liftoff,
    Burnout,
    Apogee,
    ParachuteDeploy,
    Land,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::None => "NONE",
            Event::Liftoff => "LIFTOFF",
            Event::Burnout => "BURNOUT",
            Event::Apogee => "APOGEE",
            Event::ParachuteDeploy => "PARACHUTE_DEPLOY",
            Event::Land => "LAND",
        };
        f.write_str(name)
    }
}

/// Rigid-body state of the vehicle at the current step.
///
/// `before_step` hooks add to the force and moment accumulators; the
/// integrator consumes and resets them when it advances the state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicsState {
    /// Simulated time in seconds.
    pub time: f64,

    pub position: Vector3,
    pub velocity: Vector3,
    pub acceleration: Vector3,
    pub angular_velocity: Vector3,
    pub angular_acceleration: Vector3,
    pub orientation: Quaternion,

    /// Current total mass in kilograms.
    pub mass: f64,

    pub accumulated_force: Vector3,
    pub accumulated_moment: Vector3,

    /// Event detected during the last step.
    pub current_event: Event,
}

impl PhysicsState {
    /// Creates a resting state with the given mass.
    pub fn with_mass(mass: f64) -> Self {
        Self {
            mass,
            ..Self::default()
        }
    }

    /// Speed in m/s.
    pub fn speed(&self) -> f64 {
        self.velocity.magnitude()
    }
}

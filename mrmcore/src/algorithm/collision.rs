use serde::{Deserialize, Serialize};

/// Linear mapping from library collision energy to the collision energy of
/// the triple-quadrupole instrument the transitions are exported to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionEnergyCalibration {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for CollisionEnergyCalibration {
    fn default() -> Self {
        CollisionEnergyCalibration { slope: 0.5788, intercept: 9.4452 }
    }
}

impl CollisionEnergyCalibration {
    pub fn new(slope: f64, intercept: f64) -> Self {
        CollisionEnergyCalibration { slope, intercept }
    }

    /// convert a library collision energy to the triple quadrupole energy
    ///
    /// Arguments:
    ///
    /// * `collision_energy` - collision energy of the library spectrum, NaN when unknown
    ///
    /// Returns:
    ///
    /// * `f64` - `slope * collision_energy + intercept`, or 0 for a missing energy
    ///
    /// # Examples
    ///
    /// ```
    /// use mrmcore::algorithm::collision::CollisionEnergyCalibration;
    ///
    /// let calibration = CollisionEnergyCalibration::new(0.5, 10.0);
    /// assert_eq!(calibration.to_instrument(20.0), 20.0);
    /// assert_eq!(calibration.to_instrument(f64::NAN), 0.0);
    /// ```
    pub fn to_instrument(&self, collision_energy: f64) -> f64 {
        if collision_energy.is_nan() {
            return 0.0;
        }
        self.slope * collision_energy + self.intercept
    }
}

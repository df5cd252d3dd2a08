use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Collision-energy tier of a fragment observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyTier {
    Low,
    Medium,
    High,
}

impl EnergyTier {
    pub const ALL: [EnergyTier; 3] = [EnergyTier::Low, EnergyTier::Medium, EnergyTier::High];
}

impl Display for EnergyTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EnergyTier::Low => write!(f, "low"),
            EnergyTier::Medium => write!(f, "medium"),
            EnergyTier::High => write!(f, "high"),
        }
    }
}

/// Tier boundaries, closed on the upper bound: `<= low_max`,
/// `(low_max, medium_max]`, `> medium_max`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierBounds {
    pub low_max: f64,
    pub medium_max: f64,
}

impl TierBounds {
    /// Normalized collision energy tiers of the coverage method.
    pub const NCE: TierBounds = TierBounds { low_max: 60.0, medium_max: 120.0 };
    /// Raw collision energy tiers of the overlap method.
    pub const CE: TierBounds = TierBounds { low_max: 20.0, medium_max: 40.0 };

    /// Tier of an energy value.
    ///
    /// Arguments:
    ///
    /// * `energy` - collision energy, raw or normalized depending on the bounds
    ///
    /// Returns:
    ///
    /// * `Option<EnergyTier>` - `None` for NaN; bounds are inclusive on the upper side
    ///
    /// # Examples
    ///
    /// ```
    /// use mrmcore::data::tier::{EnergyTier, TierBounds};
    ///
    /// assert_eq!(TierBounds::NCE.classify(60.0), Some(EnergyTier::Low));
    /// assert_eq!(TierBounds::NCE.classify(60.5), Some(EnergyTier::Medium));
    /// assert_eq!(TierBounds::CE.classify(45.0), Some(EnergyTier::High));
    /// assert_eq!(TierBounds::CE.classify(f64::NAN), None);
    /// ```
    pub fn classify(&self, energy: f64) -> Option<EnergyTier> {
        if energy <= self.low_max {
            Some(EnergyTier::Low)
        } else if energy <= self.medium_max {
            Some(EnergyTier::Medium)
        } else if energy > self.medium_max {
            Some(EnergyTier::High)
        } else {
            None
        }
    }
}

/// Items partitioned into the three energy tiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tiered<T> {
    pub low: Vec<T>,
    pub medium: Vec<T>,
    pub high: Vec<T>,
}

impl<T> Default for Tiered<T> {
    fn default() -> Self {
        Tiered { low: Vec::new(), medium: Vec::new(), high: Vec::new() }
    }
}

impl<T> Tiered<T> {
    /// Splits `items` by the energy returned from `energy`, keeping input
    /// order inside each tier. Items without a tier are dropped.
    pub fn split<I, F>(items: I, bounds: TierBounds, energy: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> f64,
    {
        let mut tiered = Tiered::default();
        for item in items {
            if let Some(tier) = bounds.classify(energy(&item)) {
                tiered.get_mut(tier).push(item);
            }
        }
        tiered
    }

    pub fn get(&self, tier: EnergyTier) -> &[T] {
        match tier {
            EnergyTier::Low => &self.low,
            EnergyTier::Medium => &self.medium,
            EnergyTier::High => &self.high,
        }
    }

    pub fn get_mut(&mut self, tier: EnergyTier) -> &mut Vec<T> {
        match tier {
            EnergyTier::Low => &mut self.low,
            EnergyTier::Medium => &mut self.medium,
            EnergyTier::High => &mut self.high,
        }
    }

    pub fn len(&self) -> usize {
        self.low.len() + self.medium.len() + self.high.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenates the tiers in low, medium, high order.
    pub fn into_flat(self) -> Vec<T> {
        let mut flat = self.low;
        flat.extend(self.medium);
        flat.extend(self.high);
        flat
    }

    /// Number of distinct identities per tier, as returned by `identity`.
    pub fn distinct_counts<F>(&self, identity: F) -> [usize; 3]
    where
        F: Fn(&T) -> &str,
    {
        EnergyTier::ALL.map(|tier| {
            self.get(tier).iter().map(&identity).collect::<HashSet<&str>>().len()
        })
    }
}

/// Distinct interfering identities observed per collision-energy tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub all: usize,
}

impl Coverage {
    pub fn tier(&self, tier: EnergyTier) -> usize {
        match tier {
            EnergyTier::Low => self.low,
            EnergyTier::Medium => self.medium,
            EnergyTier::High => self.high,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_bounds_closed_on_upper_bound() {
        let nce = TierBounds::NCE;
        assert_eq!(nce.classify(60.0), Some(EnergyTier::Low));
        assert_eq!(nce.classify(60.0001), Some(EnergyTier::Medium));
        assert_eq!(nce.classify(120.0), Some(EnergyTier::Medium));
        assert_eq!(nce.classify(120.5), Some(EnergyTier::High));
        assert_eq!(nce.classify(f64::NAN), None);

        let ce = TierBounds::CE;
        assert_eq!(ce.classify(20.0), Some(EnergyTier::Low));
        assert_eq!(ce.classify(40.0), Some(EnergyTier::Medium));
        assert_eq!(ce.classify(41.0), Some(EnergyTier::High));
    }

    #[test]
    fn test_split_keeps_order_and_drops_nan() {
        let values = vec![10.0, 70.0, f64::NAN, 130.0, 5.0];
        let tiered = Tiered::split(values, TierBounds::NCE, |v| *v);
        assert_eq!(tiered.low, vec![10.0, 5.0]);
        assert_eq!(tiered.medium, vec![70.0]);
        assert_eq!(tiered.high, vec![130.0]);
        assert_eq!(tiered.len(), 4);
        assert_eq!(tiered.into_flat(), vec![10.0, 5.0, 70.0, 130.0]);
    }

    #[test]
    fn test_distinct_counts() {
        let items = vec![("a", 10.0), ("a", 20.0), ("b", 30.0), ("c", 200.0)];
        let tiered = Tiered::split(items, TierBounds::NCE, |(_, e)| *e);
        assert_eq!(tiered.distinct_counts(|item| item.0), [2, 0, 1]);
    }
}

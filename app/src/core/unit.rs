use std::{fmt::Display, iter::Sum, ops::Add};

use derive_more::derive::AsRef;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, AsRef, serde::Serialize)]
#[serde(transparent)]
pub struct KiloWattHours(pub f64);

impl KiloWattHours {
    pub const ZERO: KiloWattHours = KiloWattHours(0.0);

    //Meter resolution is Wh, more digits are summation noise
    pub fn rounded(&self) -> f64 {
        (self.0 * 1000.0).round() / 1000.0
    }
}

impl Display for KiloWattHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} kWh", self.rounded())
    }
}

impl Add for KiloWattHours {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        KiloWattHours(self.0 + rhs.0)
    }
}

impl Sum for KiloWattHours {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a KiloWattHours> for KiloWattHours {
    fn sum<I: Iterator<Item = &'a KiloWattHours>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_is_rounded_to_watt_hours() {
        let total: KiloWattHours = [0.1, 0.2, 0.35].into_iter().map(KiloWattHours).sum();

        assert_eq!(total.rounded(), 0.65);
        assert_eq!(total.to_string(), "0.65 kWh");
    }

    #[test]
    fn empty_sum_is_zero() {
        let total: KiloWattHours = Vec::<KiloWattHours>::new().iter().sum();

        assert_eq!(total, KiloWattHours::ZERO);
    }
}

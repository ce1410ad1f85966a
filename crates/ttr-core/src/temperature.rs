//! Temperature unit and scale conversion.
//!
//! Providers own unit conversion: everything crossing the provider port must
//! already be Celsius. This module gives adapters a single way to get there
//! from whatever wire format a vendor uses (e.g. ecobee's tenths of °F).

/// Temperature unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

/// How a raw value is scaled on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// No scaling (72.5 means 72.5°).
    None,
    /// Tenths (725 means 72.5°).
    Tenths,
    /// Hundredths (7250 means 72.5°).
    Hundredths,
}

impl Scale {
    fn divisor(self) -> f64 {
        match self {
            Scale::None => 1.0,
            Scale::Tenths => 10.0,
            Scale::Hundredths => 100.0,
        }
    }
}

/// A unit + scale pair describing a vendor's temperature encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Format {
    pub unit: Unit,
    pub scale: Scale,
}

/// Ecobee wire format: tenths of degrees Fahrenheit.
pub const ECOBEE: Format = Format {
    unit: Unit::Fahrenheit,
    scale: Scale::Tenths,
};

/// Standard Celsius, unscaled.
pub const CELSIUS: Format = Format {
    unit: Unit::Celsius,
    scale: Scale::None,
};

/// Convert a raw value in `from` format to unscaled Celsius. `None` in means
/// the reading is absent and stays absent.
pub fn to_celsius(value: Option<f64>, from: Format) -> Option<f64> {
    let raw = value?;
    let unscaled = raw / from.scale.divisor();

    Some(match from.unit {
        Unit::Celsius => unscaled,
        Unit::Fahrenheit => (unscaled - 32.0) * 5.0 / 9.0,
        Unit::Kelvin => unscaled - 273.15,
    })
}

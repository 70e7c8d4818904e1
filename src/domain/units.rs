//! Unit conversion between the canonical metric units stored locally and the
//! imperial units the carrier API expects. Conversion happens only at the
//! outbound request boundary; persisted parcels stay in kilograms/centimeters.

/// Ounces per kilogram.
pub const OUNCES_PER_KILOGRAM: f64 = 35.274;

/// Inches per centimeter.
pub const INCHES_PER_CENTIMETER: f64 = 0.3937;

pub fn kilograms_to_ounces(kilograms: f64) -> f64 {
    kilograms * OUNCES_PER_KILOGRAM
}

pub fn centimeters_to_inches(centimeters: f64) -> f64 {
    centimeters * INCHES_PER_CENTIMETER
}

pub fn ounces_to_kilograms(ounces: f64) -> f64 {
    ounces / OUNCES_PER_KILOGRAM
}

pub fn inches_to_centimeters(inches: f64) -> f64 {
    inches / INCHES_PER_CENTIMETER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_kilograms_to_ounces() {
        assert!((kilograms_to_ounces(15.0) - 529.11).abs() < 0.01);
        assert!((kilograms_to_ounces(1.0) - 35.274).abs() < f64::EPSILON);
    }

    #[test]
    fn converts_centimeters_to_inches() {
        assert!((centimeters_to_inches(30.0) - 11.811).abs() < 0.001);
        assert!((centimeters_to_inches(2.54) - 0.999998).abs() < 0.0001);
    }

    #[test]
    fn inverse_conversions_round_trip() {
        assert!((ounces_to_kilograms(kilograms_to_ounces(15.0)) - 15.0).abs() < 1e-9);
        assert!((inches_to_centimeters(centimeters_to_inches(30.0)) - 30.0).abs() < 1e-9);
    }
}

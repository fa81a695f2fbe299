/// Coordinate quantization: rounding a GPS pair to a fixed number of
/// decimal digits so that nearby points share one cache key.

pub const MIN_PRECISION: u8 = 0;
pub const MAX_PRECISION: u8 = 7;

/// A quantized coordinate pair, stored as decimally scaled integer degrees
/// so it can be hashed and compared exactly (raw `f64` pairs cannot).
/// Used only as a cache key, never as a displayed coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantizedKey {
    lat: i64,
    lon: i64,
}

/// Rounds both components to `precision` decimal digits.
///
/// Rounding mode is round-half-away-from-zero (`f64::round` after decimal
/// scaling). The mode matters only for points exactly on a cell boundary,
/// where it decides which of the two adjacent cache cells the point lands
/// in; it is fixed here so repeated runs agree.
///
/// Pure and deterministic: equal inputs always produce equal keys.
pub fn quantize(lat: f64, lon: f64, precision: u8) -> QuantizedKey {
    debug_assert!((MIN_PRECISION..=MAX_PRECISION).contains(&precision));
    let scale = 10f64.powi(i32::from(precision));
    QuantizedKey {
        lat: (lat * scale).round() as i64,
        lon: (lon * scale).round() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let first = quantize(25.28544, 51.53104, 1);
        let second = quantize(25.28544, 51.53104, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn groups_points_within_a_cell() {
        // ~11 km cells at precision 1.
        assert_eq!(quantize(25.31, 51.52, 1), quantize(25.29, 51.54, 1));
        assert_ne!(quantize(25.31, 51.52, 1), quantize(25.41, 51.52, 1));
    }

    #[test]
    fn higher_precision_separates_points() {
        assert_eq!(quantize(25.31, 51.52, 1), quantize(25.29, 51.52, 1));
        assert_ne!(quantize(25.31, 51.52, 2), quantize(25.29, 51.52, 2));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(quantize(0.25, 0.0, 1), quantize(0.3, 0.0, 1));
        assert_eq!(quantize(-0.25, 0.0, 1), quantize(-0.3, 0.0, 1));
    }

    #[test]
    fn handles_southern_and_western_hemispheres() {
        let key = quantize(-33.8688, -151.2093, 1);
        assert_eq!(key, quantize(-33.9, -151.2, 1));
    }

    #[test]
    fn precision_zero_collapses_to_whole_degrees() {
        assert_eq!(quantize(25.4, 51.4, 0), quantize(25.0, 51.0, 0));
        assert_ne!(quantize(25.6, 51.4, 0), quantize(25.0, 51.0, 0));
    }
}

use crate::metrics::MetricsV2;
use crate::params::{Dimension, ProductBands};

/// Mean squared band distance of the hard dimensions, each distance
/// normalized by its band width (zero-width bands use raw percentage points).
///
/// Only dimensions that have a band are counted. Returns 0.0 when every
/// counted dimension sits inside its band, or when no band is defined.
pub fn calculate_band_error(metrics: &MetricsV2, bands: &ProductBands) -> f64 {
    band_error(bands, |dimension| metrics.value(dimension))
}

/// Same score over any source of per-dimension values.
pub fn band_error<F: Fn(Dimension) -> f64>(bands: &ProductBands, value_of: F) -> f64 {
    let mut squared_error_sum = 0.0;
    let mut count = 0;

    for dimension in Dimension::HARD {
        if let Some(band) = bands.band(dimension) {
            let distance = band.distance(value_of(dimension));
            let normalized = if band.width() > 0.0 {
                distance / band.width()
            } else {
                distance
            };
            squared_error_sum += normalized.powi(2);
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        squared_error_sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Range;

    fn bands() -> ProductBands {
        ProductBands {
            ts: Some(Range(36.0, 42.0)),
            fat: Some(Range(10.0, 16.0)),
            sugars: Some(Range(14.0, 20.0)),
            msnf: None,
            sp: None,
            pac: Some(Range(0.0, 0.0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_band_error_inside_bands() {
        let m = MetricsV2 {
            ts_pct: 40.0,
            fat_pct: 12.0,
            sugars_pct: 15.0,
            ..Default::default()
        };
        assert_eq!(calculate_band_error(&m, &bands()), 0.0);
    }

    #[test]
    fn test_band_error_some_diff() {
        let m = MetricsV2 {
            ts_pct: 45.0,     // 3 over a width of 6 -> 0.5, sq 0.25
            fat_pct: 4.0,     // 6 under a width of 6 -> 1.0, sq 1.0
            sugars_pct: 15.0, // inside
            pac: 2.0,         // zero-width band, raw 2 -> sq 4.0
            ..Default::default()
        };
        // (0.25 + 1.0 + 0 + 4.0) / 4
        assert_eq!(calculate_band_error(&m, &bands()), 1.3125);
    }

    #[test]
    fn test_band_error_reads_values_through_closure() {
        let score = band_error(&bands(), |d| match d {
            Dimension::Ts => 45.0,
            Dimension::Fat => 4.0,
            Dimension::Sugars => 15.0,
            Dimension::Pac => 2.0,
            _ => 0.0,
        });
        assert_eq!(score, 1.3125);
    }

    #[test]
    fn test_band_error_no_bands() {
        let m = MetricsV2 {
            fat_pct: 50.0,
            ..Default::default()
        };
        assert_eq!(calculate_band_error(&m, &ProductBands::default()), 0.0);
    }
}

//! Great-circle distance on a spherical Earth

/// Sphere radius used by document stores for GeoJSON `$near` queries (meters)
pub const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Haversine distance in meters between two `(longitude, latitude)` points in degrees
pub fn haversine_distance_m(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lon1, lat1) = (from.0.to_radians(), from.1.to_radians());
    let (lon2, lat2) = (to.0.to_radians(), to.1.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against a > 1.0 from float error on antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_distance_m((12.5, 41.9), (12.5, 41.9)), 0.0);
    }

    #[test]
    fn test_hundredth_degree_latitude() {
        // ~1.11 km along a meridian
        let d = haversine_distance_m((0.0, 0.0), (0.0, 0.01));
        assert!((d - 1113.2).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_axis_order_matters() {
        // One degree of longitude at 60N is half a degree of latitude's length
        let along_lon = haversine_distance_m((0.0, 60.0), (1.0, 60.0));
        let along_lat = haversine_distance_m((0.0, 60.0), (0.0, 61.0));
        assert!(along_lon < along_lat * 0.6);
    }

    proptest! {
        #[test]
        fn prop_symmetric_and_bounded(
            lon1 in -180.0f64..180.0, lat1 in -90.0f64..90.0,
            lon2 in -180.0f64..180.0, lat2 in -90.0f64..90.0,
        ) {
            let ab = haversine_distance_m((lon1, lat1), (lon2, lat2));
            let ba = haversine_distance_m((lon2, lat2), (lon1, lat1));
            prop_assert!(ab >= 0.0);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab <= std::f64::consts::PI * EARTH_RADIUS_M + 1e-6);
        }
    }
}

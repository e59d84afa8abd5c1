//! Pure geometry helpers, in the host crate's `physics_engine` style: no
//! external state, deterministic, unit-testable in isolation.

use crate::types::GpsFix;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes on the WGS-84 sphere.
pub fn haversine_distance_m(a: GpsFix, b: GpsFix) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Projects `fix` forward `distance_m` along `heading_rad` (radians
/// clockwise from true north), preserving altitude.
pub fn project(fix: GpsFix, heading_rad: f64, distance_m: f64) -> GpsFix {
    let angular_distance = distance_m / EARTH_RADIUS_M;
    let lat1 = fix.lat.to_radians();
    let lon1 = fix.lon.to_radians();

    let lat2 =
        (lat1.sin() * angular_distance.cos() + lat1.cos() * angular_distance.sin() * heading_rad.cos()).asin();
    let lon2 = lon1
        + (heading_rad.sin() * angular_distance.sin() * lat1.cos())
            .atan2(angular_distance.cos() - lat1.sin() * lat2.sin());

    GpsFix {
        lat: lat2.to_degrees(),
        lon: lon2.to_degrees(),
        altitude_m: fix.altitude_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_identical_points_is_zero() {
        let a = GpsFix { lat: 45.0, lon: 6.0, altitude_m: 0.0 };
        assert!(haversine_distance_m(a, a) < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude_is_roughly_111km() {
        let a = GpsFix { lat: 45.0, lon: 6.0, altitude_m: 0.0 };
        let b = GpsFix { lat: 46.0, lon: 6.0, altitude_m: 0.0 };
        let d = haversine_distance_m(a, b);
        assert!((d - 111_195.0).abs() < 2_000.0);
    }

    #[test]
    fn projecting_due_east_increases_longitude() {
        let a = GpsFix { lat: 45.0, lon: 6.0, altitude_m: 0.0 };
        let b = project(a, std::f64::consts::FRAC_PI_2, 10_000.0);
        assert!(b.lon > a.lon);
        assert!((b.lat - a.lat).abs() < 0.01);
    }
}

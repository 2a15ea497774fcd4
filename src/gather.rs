//! The "gather" action: pull scattered windows towards their common
//! centroid so everything is reachable again after a long pan.
//!
//! Pure geometry; the caller applies the returned centres to its views
//! and snaps the viewport to the returned centroid.

use smithay::utils::{Logical, Point, Size};

/// Minimum spacing kept between a gathered window edge and the centroid.
pub const GATHER_GAP: f64 = 20.0;

const EPSILON: f64 = 1e-6;

/// For each `(centre, size)` compute the gathered centre: the view is
/// pulled halfway towards the centroid, but never closer than its own
/// edge distance plus [`GATHER_GAP`]. Returns the new centres and the
/// centroid of the new layout.
pub fn gather_centres(
    views: &[(Point<f64, Logical>, Size<i32, Logical>)],
) -> Option<(Vec<Point<f64, Logical>>, Point<f64, Logical>)> {
    if views.is_empty() {
        return None;
    }

    let n = views.len() as f64;
    let centroid_x = views.iter().map(|(c, _)| c.x).sum::<f64>() / n;
    let centroid_y = views.iter().map(|(c, _)| c.y).sum::<f64>() / n;

    let mut new_centres = Vec::with_capacity(views.len());
    for &(centre, size) in views {
        let vx = centre.x - centroid_x;
        let vy = centre.y - centroid_y;
        let distance = (vx * vx + vy * vy).sqrt();
        if distance < EPSILON {
            // Already sitting on the centroid; leave it there.
            new_centres.push(centre);
            continue;
        }
        let ux = vx / distance;
        let uy = vy / distance;

        // Distance from the window centre to its edge along the pull
        // direction, infinite when the direction is axis-aligned away
        // from that axis.
        let half_w = size.w as f64 / 2.0;
        let half_h = size.h as f64 / 2.0;
        let edge_x = if ux.abs() < EPSILON {
            f64::INFINITY
        } else {
            half_w / ux.abs()
        };
        let edge_y = if uy.abs() < EPSILON {
            f64::INFINITY
        } else {
            half_h / uy.abs()
        };
        let edge = edge_x.min(edge_y);

        let min_distance = edge + GATHER_GAP;
        let new_distance = (distance * 0.5).max(min_distance);
        new_centres.push(Point::from((
            centroid_x + ux * new_distance,
            centroid_y + uy * new_distance,
        )));
    }

    let new_centroid = Point::from((
        new_centres.iter().map(|c| c.x).sum::<f64>() / n,
        new_centres.iter().map(|c| c.y).sum::<f64>() / n,
    ));
    Some((new_centres, new_centroid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(
        x: f64,
        y: f64,
        w: i32,
        h: i32,
    ) -> (Point<f64, Logical>, Size<i32, Logical>) {
        (Point::from((x, y)), Size::from((w, h)))
    }

    #[test]
    fn empty_is_none() {
        assert!(gather_centres(&[]).is_none());
    }

    #[test]
    fn single_view_stays_put() {
        let (centres, centroid) = gather_centres(&[view(500.0, 300.0, 200, 200)]).unwrap();
        assert_eq!(centres[0], Point::from((500.0, 300.0)));
        assert_eq!(centroid, Point::from((500.0, 300.0)));
    }

    #[test]
    fn two_views_pull_together() {
        // V1 centre (100,100), V2 centre (1100,100), both 200x200.
        // Centroid (600,100); each view is 500 away, halves to 250
        // (well above the 120 minimum), so the centres land at
        // (350,100) and (850,100) and the centroid is unchanged.
        let (centres, centroid) =
            gather_centres(&[view(100.0, 100.0, 200, 200), view(1100.0, 100.0, 200, 200)])
                .unwrap();
        assert!((centres[0].x - 350.0).abs() < 1e-9);
        assert!((centres[0].y - 100.0).abs() < 1e-9);
        assert!((centres[1].x - 850.0).abs() < 1e-9);
        assert!((centres[1].y - 100.0).abs() < 1e-9);
        assert!((centroid.x - 600.0).abs() < 1e-9);
        assert!((centroid.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn close_views_keep_the_gap() {
        // Views already closer than edge + gap are pushed out to the
        // minimum distance, not pulled further in.
        let (centres, _) =
            gather_centres(&[view(0.0, 0.0, 200, 200), view(150.0, 0.0, 200, 200)]).unwrap();
        let d = centres[1].x - centres[0].x;
        assert!((d - 2.0 * (100.0 + GATHER_GAP)).abs() < 1e-9);
    }

    #[test]
    fn coincident_views_stay_coincident() {
        let (centres, _) =
            gather_centres(&[view(50.0, 50.0, 100, 100), view(50.0, 50.0, 100, 100)]).unwrap();
        assert_eq!(centres[0], centres[1]);
    }
}

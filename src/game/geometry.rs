//! Collision math shared by projectiles, flags, bases and utilities

use super::Point;

/// Axis-aligned rectangle; (x, y) is the lower-left corner in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Round half up: 2.5 -> 3, -2.5 -> -2
pub fn round_half_up(value: f64) -> i32 {
    let floor = value.floor();
    if value - floor >= 0.5 {
        value.ceil() as i32
    } else {
        floor as i32
    }
}

/// Two circles collide when their centers are strictly closer than the sum of radii
pub fn circle_collision(a: Point, a_radius: f64, b: Point, b_radius: f64) -> bool {
    a.distance(&b) < a_radius + b_radius
}

pub fn circle_to_rectangle(center: Point, radius: f64, rect: &Rect) -> bool {
    let half_width = rect.width / 2.0;
    let half_height = rect.height / 2.0;

    let dx = (center.x - rect.x - half_width).abs();
    let dy = (center.y - rect.y - half_height).abs();

    if dx > half_width + radius || dy > half_height + radius {
        return false;
    }

    if dx <= half_width || dy <= half_height {
        return true;
    }

    let corner = (dx - half_width).powi(2) + (dy - half_height).powi(2);
    corner <= radius * radius
}

/// Does the segment start..end pass within `radius` of `center`?
pub fn line_circle_collision(center: Point, radius: f64, start: Point, end: Point) -> bool {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let fx = start.x - center.x;
    let fy = start.y - center.y;

    let a = dx * dx + dy * dy;
    let b = 2.0 * (fx * dx + fy * dy);
    let c = fx * fx + fy * fy - radius * radius;

    if a == 0.0 {
        // Degenerate segment
        return c <= 0.0;
    }

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return false;
    }

    let root = discriminant.sqrt();
    let t1 = (-b - root) / (2.0 * a);
    let t2 = (-b + root) / (2.0 * a);

    (0.0..=1.0).contains(&t1) || (0.0..=1.0).contains(&t2) || (t1 < 0.0 && t2 > 1.0)
}

/// Linear splash falloff from full damage at the center toward `raw * decay`.
/// Nothing outside the splash radius takes damage.
pub fn aoe_damage(raw_damage: f64, decay: f64, radius: f64, distance: f64) -> f64 {
    if distance >= radius {
        return 0.0;
    }
    let ratio = distance / radius;
    let damage_ratio = raw_damage * ratio;
    (raw_damage - damage_ratio + damage_ratio * decay).max(0.0)
}

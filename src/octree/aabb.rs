use glam::Vec3;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Tight bounds of a flat `[x0, y0, z0, x1, ...]` position array.
    pub fn from_points(pts: &[f32]) -> Self {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in pts.chunks_exact(3) {
            let p = Vec3::new(p[0], p[1], p[2]);
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Length of the longest side.
    pub fn max_extent(&self) -> f32 {
        let size = self.max - self.min;
        size.x.max(size.y).max(size.z)
    }

    /// The smallest axis-aligned cube sharing this box's center and
    /// containing it. Octrees are built over a cube so that cells stay
    /// cubical at every level.
    pub fn cube(&self) -> Aabb {
        let radius = self.max_extent() * 0.5;
        let center = self.center();
        Aabb {
            min: center - Vec3::splat(radius),
            max: center + Vec3::splat(radius),
        }
    }
}

use std::ops::Index;

use derive_more::{Add, Constructor, Mul, Sub, Sum};
use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dim3D {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Dim3D {
    pub fn iter() -> impl Iterator<Item = Dim3D> {
        [Dim3D::X, Dim3D::Y, Dim3D::Z].into_iter()
    }
}

#[derive(
    Add, Sub, Mul, Sum, Constructor, Default, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize,
    Deserialize,
)]
pub struct Vec2<T> {
    pub x: T,
    pub y: T,
}

pub type Vec2U = Vec2<u32>;
pub type Vec2F = Vec2<f32>;

impl<T> From<(T, T)> for Vec2<T> {
    fn from((x, y): (T, T)) -> Self {
        Vec2 { x, y }
    }
}

impl<T> From<Vec2<T>> for (T, T) {
    fn from(v: Vec2<T>) -> Self {
        (v.x, v.y)
    }
}

#[derive(
    Add, Sub, Mul, Sum, Constructor, Default, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize,
    Deserialize,
)]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

pub type Vec3U = Vec3<u32>;
pub type Vec3F = Vec3<f32>;

impl<T> From<(T, T, T)> for Vec3<T> {
    fn from((x, y, z): (T, T, T)) -> Self {
        Vec3 { x, y, z }
    }
}

impl<T> From<Vec3<T>> for (T, T, T) {
    fn from(v: Vec3<T>) -> Self {
        (v.x, v.y, v.z)
    }
}

impl<T> Vec3<T> {
    pub fn iter<'a>(&self) -> impl Iterator<Item = T> + 'a
    where
        T: Copy + 'a,
    {
        [self.x, self.y, self.z].into_iter()
    }

    pub fn enumerate<'a>(&self) -> impl Iterator<Item = (Dim3D, T)> + 'a
    where
        T: Copy + 'a,
    {
        Dim3D::iter().zip(self.iter())
    }
}

impl<T> Index<Dim3D> for Vec3<T> {
    type Output = T;

    fn index(&self, i: Dim3D) -> &T {
        match i {
            Dim3D::X => &self.x,
            Dim3D::Y => &self.y,
            Dim3D::Z => &self.z,
        }
    }
}

impl Vec3F {
    pub const ZERO: Vec3F = Vec3F {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn dot(self, other: Vec3F) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3F) -> Vec3F {
        Vec3F {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }
}

#[derive(Constructor, Default, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
pub struct Bounds2<T> {
    pub min: Vec2<T>,
    pub max: Vec2<T>,
}

pub type Bounds2F = Bounds2<f32>;

impl Bounds2F {
    pub fn union(self, other: Bounds2F) -> Bounds2F {
        Bounds2::new(
            Vec2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            Vec2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }
}

#[derive(Constructor, Default, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
pub struct Bounds3<T> {
    pub min: Vec3<T>,
    pub max: Vec3<T>,
}

pub type Bounds3F = Bounds3<f32>;

impl Bounds3F {
    pub fn contains(&self, p: Vec3F) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_of_axes() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn bounds_union() {
        let a = Bounds2::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 2.0));
        let b = Bounds2::new(Vec2::new(-1.0, 1.0), Vec2::new(0.5, 3.0));
        assert_eq!(
            a.union(b),
            Bounds2::new(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 3.0))
        );
    }

    #[test]
    fn contains_is_inclusive() {
        let b = Bounds3::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0));
        assert!(b.contains(Vec3::new(1.0, 0.0, 0.5)));
        assert!(!b.contains(Vec3::new(1.1, 0.0, 0.5)));
    }
}

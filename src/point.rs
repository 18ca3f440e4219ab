use crate::error::Error;
use ordered_float::NotNan;
use std::ops::Sub;

/// A 2-D landmark position in image space (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub(crate) struct Point {
    x: f32,
    y: f32,
}

impl Point {
    pub(crate) fn new(x: f32, y: f32) -> Result<Self, Error> {
        Ok(Self {
            x: finite(x)?,
            y: finite(y)?,
        })
    }

    #[inline]
    pub(crate) fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    pub(crate) fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub(crate) fn x(self) -> f32 {
        self.x
    }

    #[inline]
    pub(crate) fn y(self) -> f32 {
        self.y
    }
}

fn finite(value: f32) -> Result<f32, Error> {
    let value = NotNan::new(value).map_err(|e| Error::ConstructNotNan(e, value))?;
    if value.is_infinite() {
        return Err(Error::InfiniteCoordinate(*value));
    }
    Ok(value.into_inner())
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

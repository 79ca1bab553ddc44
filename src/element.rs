use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A fixed-size matrix element.
///
/// The distributed layer never looks inside an element; it only copies them
/// and, for accumulation, folds two of them together with [`Element::combine`].
pub trait Element:
    'static
    + Copy
    + Default
    + std::fmt::Debug
    + PartialEq
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
{
    /// Elementwise sum used by accumulate operations.
    fn combine(self, other: Self) -> Self;
}

/// Elements that can be averaged, needed to symmetrize a matrix.
pub trait Average: Element {
    fn average(self, other: Self) -> Self;
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                #[inline]
                fn combine(self, other: Self) -> Self {
                    self + other
                }
            }
        )*
    };
}

impl_element!(f32, f64, i32, i64, u32, u64, usize);

impl Average for f32 {
    #[inline]
    fn average(self, other: Self) -> Self {
        (self + other) * 0.5
    }
}

impl Average for f64 {
    #[inline]
    fn average(self, other: Self) -> Self {
        (self + other) * 0.5
    }
}

/// How transferred data lands in the destination block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombineOp {
    /// Overwrite the destination elements.
    Replace,
    /// Add into the destination elements.
    Sum,
}

impl CombineOp {
    #[inline]
    pub fn apply<T: Element>(self, dst: &mut T, src: T) {
        match self {
            CombineOp::Replace => *dst = src,
            CombineOp::Sum => *dst = dst.combine(src),
        }
    }

    /// Apply to a whole row; both slices must have the same length.
    #[inline]
    pub fn apply_row<T: Element>(self, dst: &mut [T], src: &[T]) {
        match self {
            CombineOp::Replace => dst.copy_from_slice(src),
            CombineOp::Sum => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = d.combine(*s);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_row() {
        let mut dst = vec![1.0f64, 2.0, 3.0];
        CombineOp::Sum.apply_row(&mut dst, &[0.5, 0.5, 0.5]);
        assert_eq!(dst, vec![1.5, 2.5, 3.5]);
        CombineOp::Replace.apply_row(&mut dst, &[7.0, 8.0, 9.0]);
        assert_eq!(dst, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_average() {
        assert_eq!(10.0f64.average(14.0), 12.0);
        assert_eq!(1.0f32.average(2.0), 1.5);
    }

    #[test]
    fn test_integer_sum() {
        let mut x = 3usize;
        CombineOp::Sum.apply(&mut x, 4);
        assert_eq!(x, 7);
    }
}

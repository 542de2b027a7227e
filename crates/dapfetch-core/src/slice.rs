//! Dimension slices and path segments

use serde::{Deserialize, Serialize};

use crate::schema::{SchemaNodeId, SchemaProvider};

/// One axis of a request: indices `first, first+stride, ...` below `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub first: usize,
    pub stride: usize,
    pub stop: usize,
    pub declared_size: usize,
}

impl Slice {
    /// Slice selecting `count` indices starting at `start`.
    ///
    /// `stop` is one past the last selected index, clamped to the declared size.
    pub fn from_request(start: usize, count: usize, stride: usize, declared_size: usize) -> Self {
        let stride = stride.max(1);
        let stop = if count == 0 {
            start
        } else {
            start + (count - 1) * stride + 1
        };
        Self {
            first: start,
            stride,
            stop: stop.min(declared_size),
            declared_size,
        }
    }

    /// Full-range slice over an axis of `declared_size`
    pub fn make_whole_slice(declared_size: usize) -> Self {
        Self {
            first: 0,
            stride: 1,
            stop: declared_size,
            declared_size,
        }
    }

    /// Number of indices selected
    pub fn count(&self) -> usize {
        if self.stop <= self.first {
            0
        } else {
            (self.stop - self.first + self.stride - 1) / self.stride
        }
    }

    /// Last selected index, if any
    pub fn last(&self) -> Option<usize> {
        match self.count() {
            0 => None,
            n => Some(self.first + (n - 1) * self.stride),
        }
    }

    pub fn is_whole(&self) -> bool {
        self.first == 0 && self.stride == 1 && self.stop == self.declared_size
    }

    /// Re-address this slice relative to a fetched `window` that covers it.
    ///
    /// The server returns the window as a zero-based array of `window.count()`
    /// elements, so the result indexes into that array. Returns `None` when the
    /// window does not contain every index of `self`.
    pub fn rebase_onto(&self, window: &Slice) -> Option<Slice> {
        let count = self.count();
        let declared_size = window.count();
        if count == 0 {
            return Some(Slice {
                first: 0,
                stride: 1,
                stop: 0,
                declared_size,
            });
        }
        if self.first < window.first
            || (self.first - window.first) % window.stride != 0
            || self.stride % window.stride != 0
        {
            return None;
        }
        let first = (self.first - window.first) / window.stride;
        let stride = self.stride / window.stride;
        let stop = first + (count - 1) * stride + 1;
        if stop > declared_size {
            return None;
        }
        Some(Slice {
            first,
            stride,
            stop,
            declared_size,
        })
    }
}

/// Union cover of two slices on the same axis.
///
/// If either side is whole the result is whole. Otherwise the result spans
/// from the smaller `first` to the larger `stop` with stride 1. Differing
/// strides are not reconciled, so the result may fetch indices neither input
/// asked for; it never drops one that either input asked for.
pub fn merge_slice(dst: &Slice, src: &Slice) -> Slice {
    let declared_size = dst.declared_size.max(src.declared_size);
    if dst.is_whole() || src.is_whole() {
        return Slice::make_whole_slice(declared_size);
    }
    Slice {
        first: dst.first.min(src.first),
        stride: 1,
        stop: dst.stop.max(src.stop),
        declared_size,
    }
}

/// The slices addressing one node on a projection path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub node: SchemaNodeId,
    pub slices: Vec<Slice>,
}

impl Segment {
    pub fn new(node: SchemaNodeId, slices: Vec<Slice>) -> Self {
        Self { node, slices }
    }

    /// Whole-range segment over every dimension of `node`, pseudo ones included
    pub fn make_whole_segment(schema: &dyn SchemaProvider, node: SchemaNodeId) -> Self {
        let slices = schema
            .dimensions(node)
            .iter()
            .map(|d| Slice::make_whole_slice(d.declared_size))
            .collect();
        Self { node, slices }
    }

    pub fn rank(&self) -> usize {
        self.slices.len()
    }

    pub fn is_whole_segment(&self) -> bool {
        self.slices.iter().all(Slice::is_whole)
    }

    /// Number of elements selected by axes `start..stop`
    pub fn segment_size(&self, start: usize, stop: usize) -> usize {
        self.slices[start..stop].iter().map(Slice::count).product()
    }

    /// Merge `other` into this segment axis by axis. Extra trailing axes of
    /// `other` are copied unchanged.
    pub fn merge(&mut self, other: &Segment) {
        for (i, slice) in other.slices.iter().enumerate() {
            if i < self.slices.len() {
                self.slices[i] = merge_slice(&self.slices[i], slice);
            } else {
                self.slices.push(*slice);
            }
        }
    }
}

/// Leftmost axis in `start..stop` such that it and every axis after it is
/// whole. Returns `start` when all axes are whole and `stop` when the last
/// axis is not.
pub fn safe_index(slices: &[Slice], start: usize, stop: usize) -> usize {
    if stop == 0 {
        return stop;
    }
    let mut safe = stop - 1;
    while safe > start {
        if !slices[safe].is_whole() {
            return safe + 1;
        }
        safe -= 1;
    }
    if slices[start].is_whole() {
        start
    } else {
        start + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(first: usize, stride: usize, stop: usize, declared: usize) -> Slice {
        Slice {
            first,
            stride,
            stop,
            declared_size: declared,
        }
    }

    #[test]
    fn test_from_request() {
        let slice = Slice::from_request(2, 3, 2, 10);
        assert_eq!(slice.stop, 7);
        assert_eq!(slice.count(), 3);
        assert_eq!(slice.last(), Some(6));
        assert!(Slice::from_request(0, 10, 1, 10).is_whole());
    }

    #[test]
    fn test_merge_is_conservative() {
        let merged = merge_slice(&s(2, 1, 5, 10), &s(0, 1, 3, 10));
        assert_eq!(merged.first, 0);
        assert_eq!(merged.stop, 5);
        assert_eq!(merged.stride, 1);
        assert!(merged.count() >= 5);
    }

    #[test]
    fn test_merge_with_whole() {
        let merged = merge_slice(&s(2, 1, 5, 10), &Slice::make_whole_slice(10));
        assert!(merged.is_whole());
    }

    #[test]
    fn test_merge_strided_widens() {
        let merged = merge_slice(&s(0, 3, 7, 10), &s(1, 2, 6, 10));
        assert_eq!((merged.first, merged.stride, merged.stop), (0, 1, 7));
    }

    #[test]
    fn test_rebase_onto_window() {
        let window = s(1, 1, 9, 10);
        let request = s(3, 2, 8, 10);
        let rebased = request.rebase_onto(&window).unwrap();
        assert_eq!(rebased, s(2, 2, 7, 8));
        assert_eq!(rebased.count(), request.count());

        // Rebasing onto itself addresses the window from zero.
        let strided = s(2, 3, 9, 10);
        assert_eq!(strided.rebase_onto(&strided).unwrap(), s(0, 1, 3, 3));

        assert!(s(0, 1, 4, 10).rebase_onto(&window).is_none());
    }

    #[test]
    fn test_safe_index() {
        let whole = Slice::make_whole_slice(4);
        let part = s(1, 1, 3, 4);
        assert_eq!(safe_index(&[whole, whole, whole], 0, 3), 0);
        assert_eq!(safe_index(&[part, whole, whole], 0, 3), 1);
        assert_eq!(safe_index(&[whole, part, whole], 0, 3), 2);
        assert_eq!(safe_index(&[whole, whole, part], 0, 3), 3);
        assert_eq!(safe_index(&[], 0, 0), 0);
    }

    #[test]
    fn test_segment_merge_and_size() {
        let mut a = Segment::new(SchemaNodeId(1), vec![s(0, 1, 2, 4)]);
        let b = Segment::new(SchemaNodeId(1), vec![s(3, 1, 4, 4), s(0, 1, 5, 5)]);
        a.merge(&b);
        assert_eq!(a.rank(), 2);
        assert_eq!(a.slices[0], s(0, 1, 4, 4));
        assert!(a.is_whole_segment());
        assert_eq!(a.segment_size(0, 2), 20);
    }
}

//! Multi-dimensional index counter
//!
//! Enumerates index tuples of a rank-N slice set in row-major order. Offsets
//! are computed against each axis's declared size, so they address the full
//! array the slices were cut from.

use crate::slice::{safe_index, Slice};

#[derive(Debug, Clone)]
pub struct Odometer {
    slices: Vec<Slice>,
    index: Vec<usize>,
    /// Elements per outer position when only a prefix of the axes is walked
    inner: usize,
    done: bool,
}

impl Odometer {
    pub fn new(slices: &[Slice]) -> Self {
        let index = slices.iter().map(|s| s.first).collect();
        let done = slices.iter().any(|s| s.count() == 0);
        Self {
            slices: slices.to_vec(),
            index,
            inner: 1,
            done,
        }
    }

    /// Odometer over the leading `rank` axes only; offsets still address the
    /// full array, with the trailing axes held at zero.
    pub fn truncated(slices: &[Slice], rank: usize) -> Self {
        let mut odom = Self::new(&slices[..rank]);
        odom.inner = slices[rank..].iter().map(|s| s.declared_size).product();
        odom
    }

    pub fn rank(&self) -> usize {
        self.slices.len()
    }

    pub fn has_more(&self) -> bool {
        if self.done {
            return false;
        }
        match self.slices.first() {
            Some(outer) => self.index[0] < outer.stop,
            None => true,
        }
    }

    /// Step to the next index tuple. Axis 0 is never reset, so once it passes
    /// its stop the odometer stays exhausted.
    pub fn advance(&mut self) {
        let rank = self.slices.len();
        if rank == 0 {
            self.done = true;
            return;
        }
        let mut axis = rank - 1;
        loop {
            self.index[axis] += self.slices[axis].stride;
            if axis == 0 || self.index[axis] < self.slices[axis].stop {
                break;
            }
            self.index[axis] = self.slices[axis].first;
            axis -= 1;
        }
    }

    /// Row-major linear offset of the current tuple in the declared array
    pub fn current_offset(&self) -> usize {
        let mut offset = 0;
        for (slice, index) in self.slices.iter().zip(&self.index) {
            offset = offset * slice.declared_size + index;
        }
        offset * self.inner
    }

    /// First axis from which every remaining axis is whole.
    ///
    /// 0 means the whole array is one contiguous run. A value `k` in
    /// `1..rank` means the outer `k` axes must be walked and each position
    /// reads one contiguous run over the rest. `rank` means no trailing axis is
    /// whole and every element is read on its own.
    pub fn contiguous_prefix_rank(&self) -> usize {
        safe_index(&self.slices, 0, self.slices.len())
    }

    /// Number of tuples this odometer visits in total
    pub fn size(&self) -> usize {
        self.slices.iter().map(Slice::count).product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whole(sizes: &[usize]) -> Vec<Slice> {
        sizes.iter().map(|&n| Slice::make_whole_slice(n)).collect()
    }

    #[test]
    fn test_whole_rank3_visits_all_offsets() {
        let mut odom = Odometer::new(&whole(&[2, 3, 4]));
        let mut seen = Vec::new();
        let mut advances = 0;
        while odom.has_more() {
            seen.push(odom.current_offset());
            odom.advance();
            advances += 1;
            if advances < 24 {
                assert!(odom.has_more());
            }
        }
        assert_eq!(advances, 24);
        assert_eq!(seen, (0..24).collect::<Vec<_>>());
        assert!(!odom.has_more());
    }

    #[test]
    fn test_strided_offsets() {
        let slices = vec![
            Slice::from_request(1, 2, 1, 3),
            Slice::from_request(0, 2, 2, 4),
        ];
        let mut odom = Odometer::new(&slices);
        let mut seen = Vec::new();
        while odom.has_more() {
            seen.push(odom.current_offset());
            odom.advance();
        }
        assert_eq!(seen, vec![4, 6, 8, 10]);
        assert_eq!(odom.size(), 4);
    }

    #[test]
    fn test_scalar_visits_once() {
        let mut odom = Odometer::new(&[]);
        assert!(odom.has_more());
        assert_eq!(odom.current_offset(), 0);
        odom.advance();
        assert!(!odom.has_more());
    }

    #[test]
    fn test_empty_axis_visits_nothing() {
        let slices = vec![Slice::make_whole_slice(3), Slice::from_request(1, 0, 1, 4)];
        assert!(!Odometer::new(&slices).has_more());
    }

    #[test]
    fn test_truncated_offsets() {
        let slices = vec![Slice::from_request(1, 2, 1, 3), Slice::make_whole_slice(4)];
        let mut odom = Odometer::truncated(&slices, 1);
        let mut seen = Vec::new();
        while odom.has_more() {
            seen.push(odom.current_offset());
            odom.advance();
        }
        assert_eq!(seen, vec![4, 8]);
    }

    #[test]
    fn test_contiguous_prefix_rank() {
        let part = Slice::from_request(1, 2, 1, 4);
        assert_eq!(Odometer::new(&whole(&[2, 3])).contiguous_prefix_rank(), 0);
        assert_eq!(Odometer::new(&[part, Slice::make_whole_slice(3)]).contiguous_prefix_rank(), 1);
        assert_eq!(Odometer::new(&[Slice::make_whole_slice(3), part]).contiguous_prefix_rank(), 2);
    }
}

//! Cartesian Products
//!
//! Lazy, restartable cartesian-product iteration over finite dimensions.
//! Used by both target enumeration (axes × aggregations) and request-time
//! expansion of multi-value dashboard variables.
//!
//! Iteration order: the first dimension is the outermost loop, the last
//! dimension varies fastest.
//!
//! ```text
//! [[a, b], [1, 2]] → [a, 1], [a, 2], [b, 1], [b, 2]
//! ```

/// Cartesian product over a fixed list of dimensions.
///
/// Cloning a `Cartesian` (or calling [`Cartesian::iter`] again) restarts the
/// sequence from the beginning.
#[derive(Debug, Clone)]
pub struct Cartesian<T> {
    dimensions: Vec<Vec<T>>,
}

impl<T: Clone> Cartesian<T> {
    /// Create a product over the given dimensions
    pub fn new(dimensions: Vec<Vec<T>>) -> Self {
        Self { dimensions }
    }

    /// Number of combinations the product yields
    ///
    /// Zero dimensions yield a single empty combination; any empty dimension
    /// yields none.
    pub fn len(&self) -> usize {
        self.dimensions.iter().map(Vec::len).product()
    }

    /// Check if the product yields no combinations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all combinations
    pub fn iter(&self) -> CartesianIter<'_, T> {
        CartesianIter {
            dimensions: &self.dimensions,
            cursor: vec![0; self.dimensions.len()],
            done: self.is_empty(),
        }
    }
}

impl<'a, T: Clone> IntoIterator for &'a Cartesian<T> {
    type Item = Vec<T>;
    type IntoIter = CartesianIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the combinations of a [`Cartesian`]
#[derive(Debug, Clone)]
pub struct CartesianIter<'a, T> {
    dimensions: &'a [Vec<T>],
    cursor: Vec<usize>,
    done: bool,
}

impl<T: Clone> Iterator for CartesianIter<'_, T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self
            .cursor
            .iter()
            .zip(self.dimensions)
            .map(|(&i, dim)| dim[i].clone())
            .collect();

        // Odometer step: advance the last dimension, carrying leftwards
        self.done = true;
        for pos in (0..self.cursor.len()).rev() {
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.dimensions[pos].len() {
                self.done = false;
                break;
            }
            self.cursor[pos] = 0;
        }

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_order() {
        let product = Cartesian::new(vec![vec!["a", "b"], vec!["1", "2", "3"]]);

        let all: Vec<Vec<&str>> = product.iter().collect();

        assert_eq!(product.len(), 6);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec!["a", "1"]);
        assert_eq!(all[1], vec!["a", "2"]);
        assert_eq!(all[3], vec!["b", "1"]);
        assert_eq!(all[5], vec!["b", "3"]);
    }

    #[test]
    fn test_zero_dimensions_yield_one_empty_combination() {
        let product: Cartesian<u8> = Cartesian::new(Vec::new());

        let all: Vec<Vec<u8>> = product.iter().collect();
        assert_eq!(all, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_empty_dimension_yields_nothing() {
        let product = Cartesian::new(vec![vec![1, 2], Vec::new()]);

        assert!(product.is_empty());
        assert_eq!(product.iter().count(), 0);
    }

    #[test]
    fn test_restartable() {
        let product = Cartesian::new(vec![vec![1, 2], vec![3]]);

        let first: Vec<_> = product.iter().collect();
        let second: Vec<_> = (&product).into_iter().collect();
        assert_eq!(first, second);
    }
}

//! Dense LU factorization with partial pivoting.

use crate::error::{Result, SimError};

/// LU factors of a square matrix, PA = LU.
///
/// L has an implicit unit diagonal and is stored below the diagonal of `lu`;
/// U is stored on and above it.
#[derive(Debug, Clone, Default)]
pub struct LuFactors {
    lu: Vec<f64>,
    pivots: Vec<usize>,
    size: usize,
    sign: f64,
}

impl LuFactors {
    /// Factorize the row-major `size` x `size` matrix `a`.
    ///
    /// A pivot no larger than machine epsilon times the largest entry of `a`
    /// is reported as [`SimError::SingularMatrix`].
    pub fn factorize(a: &[f64], size: usize) -> Result<Self> {
        let mut factors = Self::default();
        factors.factor(a, size)?;
        Ok(factors)
    }

    /// Factorize into this instance, reusing its storage.
    pub fn factor(&mut self, a: &[f64], size: usize) -> Result<()> {
        let n = size;
        self.size = n;
        self.sign = 1.0;
        self.lu.clear();
        self.lu.extend_from_slice(&a[..n * n]);
        self.pivots.clear();
        self.pivots.extend(0..n);

        let scale = self.lu.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let threshold = f64::EPSILON * scale;

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val <= threshold || !max_val.is_finite() {
                return Err(SimError::SingularMatrix { row: k });
            }

            // Swap rows if needed
            if max_row != k {
                self.pivots.swap(k, max_row);
                self.sign = -self.sign;
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            // Eliminate
            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                if factor == 0.0 {
                    continue;
                }
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    /// Solve Ax = z using the factors.
    pub fn solve(&self, z: &[f64]) -> Vec<f64> {
        let mut x = vec![0.0; self.size];
        self.solve_into(z, &mut x);
        x
    }

    /// Solve Ax = z into a caller-provided buffer.
    pub fn solve_into(&self, z: &[f64], x: &mut [f64]) {
        let n = self.size;

        // Apply pivot permutation to z
        for i in 0..n {
            x[i] = z[self.pivots[i]];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                x[i] -= self.lu[i * n + j] * x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                x[i] -= self.lu[i * n + j] * x[j];
            }
            x[i] /= self.lu[i * n + i];
        }
    }

    /// Row permutation: row `i` of PA is row `pivots()[i]` of A.
    pub fn pivots(&self) -> &[usize] {
        &self.pivots
    }

    /// Sign of the permutation (+1 or -1).
    pub fn sign(&self) -> f64 {
        self.sign
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn determinant(&self) -> f64 {
        let n = self.size;
        (0..n).map(|i| self.lu[i * n + i]).product::<f64>() * self.sign
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn multiply(a: &[f64], x: &[f64]) -> Vec<f64> {
        let n = x.len();
        (0..n)
            .map(|i| (0..n).map(|j| a[i * n + j] * x[j]).sum())
            .collect()
    }

    /// Deterministic pseudo-random values in [-1, 1).
    fn lcg(seed: &mut u64) -> f64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((*seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    #[test]
    fn test_solve_small_system() {
        // 2x + y = 5, x + 3y = 10
        let a = [2.0, 1.0, 1.0, 3.0];
        let lu = LuFactors::factorize(&a, 2).unwrap();
        let x = lu.solve(&[5.0, 10.0]);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(lu.determinant(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pivoting_on_zero_diagonal() {
        let a = [0.0, 1.0, 1.0, 0.0];
        let lu = LuFactors::factorize(&a, 2).unwrap();
        assert_eq!(lu.pivots(), &[1, 0]);
        assert_eq!(lu.sign(), -1.0);
        let x = lu.solve(&[2.0, 3.0]);
        assert_relative_eq!(x[0], 3.0);
        assert_relative_eq!(x[1], 2.0);
    }

    #[test]
    fn test_round_trip_residual() {
        let mut seed = 42u64;
        for n in [1, 3, 6, 12] {
            let mut a: Vec<f64> = (0..n * n).map(|_| lcg(&mut seed)).collect();
            // Diagonal dominance keeps the matrix nonsingular
            for i in 0..n {
                a[i * n + i] += n as f64;
            }
            let z: Vec<f64> = (0..n).map(|_| lcg(&mut seed)).collect();

            let x = LuFactors::factorize(&a, n).unwrap().solve(&z);
            let norm = (0..n)
                .map(|i| (0..n).map(|j| a[i * n + j].abs()).sum::<f64>())
                .fold(0.0, f64::max);
            for (got, want) in multiply(&a, &x).iter().zip(&z) {
                assert!((got - want).abs() <= 100.0 * f64::EPSILON * norm);
            }
        }
    }

    #[test]
    fn test_singular_detection() {
        let a = [1.0, 2.0, 2.0, 4.0];
        assert_eq!(
            LuFactors::factorize(&a, 2).unwrap_err(),
            SimError::SingularMatrix { row: 1 }
        );

        let zero = [0.0; 9];
        assert!(matches!(
            LuFactors::factorize(&zero, 3),
            Err(SimError::SingularMatrix { row: 0 })
        ));
    }

    #[test]
    fn test_factor_reuses_storage() {
        let mut lu = LuFactors::default();
        lu.factor(&[4.0], 1).unwrap();
        assert_relative_eq!(lu.solve(&[2.0])[0], 0.5);
        lu.factor(&[1.0, 0.0, 0.0, 2.0], 2).unwrap();
        assert_eq!(lu.size(), 2);
        assert_relative_eq!(lu.solve(&[1.0, 1.0])[1], 0.5);
    }
}

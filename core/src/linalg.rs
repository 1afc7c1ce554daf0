//! Linear algebra utilities shared by the estimation filters
//!
//! Small numerical helpers used by both filter families: covariance symmetrization,
//! guarded inversion of 2x2 innovation-weighting matrices, positive semi-definiteness
//! verification, and a matrix square root for coloring noise draws. All routines work
//! on the fixed-size [nalgebra] types used throughout the crate; the planar state is
//! three dimensional and the observation is two dimensional, so nothing here needs
//! dynamic allocation.

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

use crate::EstimationError;

/// Determinant magnitude below which a 2x2 covariance is treated as singular.
const SINGULARITY_TOLERANCE: f64 = 1e-12;
/// Relative eigenvalue tolerance for positive semi-definiteness checks.
const PSD_TOLERANCE: f64 = 1e-9;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Covariance propagation through floating point arithmetic drifts off the symmetric
/// manifold; the filters re-symmetrize after every update before verifying positive
/// semi-definiteness.
#[inline]
pub fn symmetrize(matrix: &Matrix3<f64>) -> Matrix3<f64> {
    (matrix + matrix.transpose()) * 0.5
}

/// Invert a 2x2 covariance, rejecting singular or ill-conditioned input.
///
/// Used for the EKF innovation covariance and for the particle filter's measurement
/// noise when evaluating the observation likelihood. A determinant with magnitude
/// below the singularity tolerance returns [EstimationError::SingularInnovation]
/// instead of amplifying noise through a near-singular inverse.
///
/// # Arguments
/// * `matrix` - The covariance to invert.
///
/// # Returns
/// * The inverse, or an error if the determinant magnitude is below tolerance.
pub fn invert_covariance_2x2(matrix: &Matrix2<f64>) -> Result<Matrix2<f64>, EstimationError> {
    let determinant = matrix.determinant();
    if determinant.abs() < SINGULARITY_TOLERANCE {
        return Err(EstimationError::SingularInnovation { determinant });
    }
    Ok(Matrix2::new(
        matrix[(1, 1)],
        -matrix[(0, 1)],
        -matrix[(1, 0)],
        matrix[(0, 0)],
    ) / determinant)
}

/// Verify that a symmetric 3x3 matrix is positive semi-definite.
///
/// The eigenvalue tolerance scales with the matrix magnitude so that covariances with
/// large entries are not rejected over round-off while a genuinely indefinite matrix
/// is. The input is assumed symmetric; callers symmetrize first.
///
/// # Arguments
/// * `matrix` - The symmetric matrix to verify.
///
/// # Returns
/// * `Ok(())` if every eigenvalue is non-negative within tolerance, otherwise
///   [EstimationError::CovarianceNotPositiveSemiDefinite] carrying the offending
///   minimum eigenvalue.
pub fn check_positive_semidefinite(matrix: &Matrix3<f64>) -> Result<(), EstimationError> {
    let eigen = matrix.symmetric_eigen();
    let min_eigenvalue = eigen.eigenvalues.min();
    let scale = eigen.eigenvalues.amax().max(1.0);
    if min_eigenvalue < -PSD_TOLERANCE * scale {
        return Err(EstimationError::CovarianceNotPositiveSemiDefinite { min_eigenvalue });
    }
    Ok(())
}

/// [check_positive_semidefinite] for the 2x2 measurement noise covariance.
pub fn check_positive_semidefinite_2x2(matrix: &Matrix2<f64>) -> Result<(), EstimationError> {
    let eigen = matrix.symmetric_eigen();
    let min_eigenvalue = eigen.eigenvalues.min();
    let scale = eigen.eigenvalues.amax().max(1.0);
    if min_eigenvalue < -PSD_TOLERANCE * scale {
        return Err(EstimationError::CovarianceNotPositiveSemiDefinite { min_eigenvalue });
    }
    Ok(())
}

/// Compute a square root `S` of a symmetric positive semi-definite matrix such that
/// approximately `matrix ≈ S * Sᵀ`.
///
/// Attempts Cholesky decomposition first (yielding L such that matrix = L * Lᵀ). If
/// Cholesky fails (e.g., the matrix is only semi-definite), the square root is
/// computed by symmetric eigenvalue decomposition (S = V * sqrt(Λ⁺) * Vᵀ) with
/// negative eigenvalues clamped to zero. The returned factor colors standard normal
/// draws: if $z \sim N(0, I)$ then $S z \sim N(0, M)$.
///
/// # Arguments
/// * `matrix` - The matrix to find the square root of. Assumed symmetric.
///
/// # Returns
/// * A matrix square root. The result from Cholesky is lower triangular; the result
///   from eigenvalue decomposition is symmetric.
pub fn matrix_square_root(matrix: &Matrix3<f64>) -> Matrix3<f64> {
    if let Some(cholesky) = matrix.cholesky() {
        return cholesky.l();
    }
    let eigen = symmetrize(matrix).symmetric_eigen();
    let sqrt_eigenvalues = eigen.eigenvalues.map(|value| value.max(0.0).sqrt());
    eigen.eigenvectors * Matrix3::from_diagonal(&sqrt_eigenvalues) * eigen.eigenvectors.transpose()
}

/// 2x2 variant of [matrix_square_root] for measurement noise covariances.
pub fn matrix_square_root_2x2(matrix: &Matrix2<f64>) -> Matrix2<f64> {
    if let Some(cholesky) = matrix.cholesky() {
        return cholesky.l();
    }
    let symmetric = 0.5 * (matrix + matrix.transpose());
    let eigen = symmetric.symmetric_eigen();
    let sqrt_eigenvalues = eigen.eigenvalues.map(|value| value.max(0.0).sqrt());
    eigen.eigenvectors * Matrix2::from_diagonal(&sqrt_eigenvalues) * eigen.eigenvectors.transpose()
}

/// Build a diagonal 3x3 covariance from per-axis standard deviations.
pub fn diagonal_covariance_3(stds: [f64; 3]) -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(
        stds[0] * stds[0],
        stds[1] * stds[1],
        stds[2] * stds[2],
    ))
}

/// Build a diagonal 2x2 covariance from per-axis standard deviations.
pub fn diagonal_covariance_2(stds: [f64; 2]) -> Matrix2<f64> {
    Matrix2::from_diagonal(&Vector2::new(stds[0] * stds[0], stds[1] * stds[1]))
}

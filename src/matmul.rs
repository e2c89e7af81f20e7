//! Small GEMM wrapper used by the batched layer passes.
//!
//! All buffers are row-major. Weight matrices are stored `(out_dim, in_dim)`, so
//! the three products a dense layer needs are expressed as strided views of the
//! same storage instead of materialized transposes:
//!
//! - forward: `Y (batch, out) = X (batch, in) * W^T`
//! - weight gradient: `dW (out, in) = dZ^T * X`
//! - input gradient: `dX (batch, in) = dZ (batch, out) * W`
//!
//! The default backend is a safe triple loop; the `matrixmultiply` feature swaps
//! in a faster kernel.

#[allow(clippy::too_many_arguments)]
#[inline]
fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);

    #[cfg(feature = "matrixmultiply")]
    {
        // matrixmultiply supports arbitrary strides; beta = 0 overwrites `c`.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                1.0,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                0.0,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f32;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                let av = a[a0 + p * csa];
                let bv = b[p * rsb + b0];
                acc = av.mul_add(bv, acc);
            }

            c[i * rsc + j * csc] = acc;
        }
    }
}

/// `out (batch, out_dim) = x (batch, in_dim) * w^T` with `w` stored `(out_dim, in_dim)`.
pub(crate) fn forward(
    batch: usize,
    in_dim: usize,
    out_dim: usize,
    x: &[f32],
    w: &[f32],
    out: &mut [f32],
) {
    assert_eq!(x.len(), batch * in_dim, "input buffer shape mismatch");
    assert_eq!(w.len(), out_dim * in_dim, "weight buffer shape mismatch");
    assert_eq!(out.len(), batch * out_dim, "output buffer shape mismatch");
    gemm_f32(batch, out_dim, in_dim, x, in_dim, 1, w, 1, in_dim, out, out_dim, 1);
}

/// `d_w (out_dim, in_dim) = d_z^T * x`, summed over the batch.
pub(crate) fn weight_grad(
    batch: usize,
    in_dim: usize,
    out_dim: usize,
    d_z: &[f32],
    x: &[f32],
    d_w: &mut [f32],
) {
    assert_eq!(d_z.len(), batch * out_dim, "d_z buffer shape mismatch");
    assert_eq!(x.len(), batch * in_dim, "input buffer shape mismatch");
    assert_eq!(d_w.len(), out_dim * in_dim, "d_w buffer shape mismatch");
    gemm_f32(out_dim, in_dim, batch, d_z, 1, out_dim, x, in_dim, 1, d_w, in_dim, 1);
}

/// `d_x (batch, in_dim) = d_z (batch, out_dim) * w`.
pub(crate) fn input_grad(
    batch: usize,
    in_dim: usize,
    out_dim: usize,
    d_z: &[f32],
    w: &[f32],
    d_x: &mut [f32],
) {
    assert_eq!(d_z.len(), batch * out_dim, "d_z buffer shape mismatch");
    assert_eq!(w.len(), out_dim * in_dim, "weight buffer shape mismatch");
    assert_eq!(d_x.len(), batch * in_dim, "d_x buffer shape mismatch");
    gemm_f32(batch, in_dim, out_dim, d_z, out_dim, 1, w, in_dim, 1, d_x, in_dim, 1);
}
